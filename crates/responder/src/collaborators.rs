//! External collaborator boundaries: document generation and chat-channel
//! management.
//!
//! Only the contract is owned here; the real services live elsewhere. HTTP
//! implementations carry client-level timeouts so a hung collaborator
//! surfaces as a bounded failure, never as a stalled sweep or coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ResponderError;
use crate::incident::Incident;

/// Post-incident document generation.
#[async_trait]
pub trait DocumentCollaborator: Send + Sync {
    /// Create the incident document and return its link.
    async fn create_document(&self, incident: &Incident) -> Result<String, ResponderError>;
}

/// Chat-channel management (war rooms).
#[async_trait]
pub trait ChatCollaborator: Send + Sync {
    /// Create a dedicated channel and return (link, channel id).
    async fn create_channel(
        &self,
        incident: &Incident,
        invitees: &[String],
    ) -> Result<(String, String), ResponderError>;

    /// Archive a previously created channel.
    async fn archive_channel(&self, channel_id: &str) -> Result<(), ResponderError>;
}

fn collaborator_error(source: &str, err: &reqwest::Error) -> ResponderError {
    ResponderError::ExternalCollaborator(format!("{source}: {err}"))
}

// =============================================================================
// HTTP implementations
// =============================================================================

/// Document service speaking a JSON-over-HTTP create API.
pub struct HttpDocumentService {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDocumentService {
    /// Create a client for a document service endpoint.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateDocumentRequest<'a> {
    incident_id: String,
    short_id: String,
    title: &'a str,
    severity: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateDocumentResponse {
    link: String,
}

#[async_trait]
impl DocumentCollaborator for HttpDocumentService {
    async fn create_document(&self, incident: &Incident) -> Result<String, ResponderError> {
        let url = format!("{}/api/documents", self.endpoint);
        debug!(incident = %incident.short_id(), "Requesting document creation");

        let response = self
            .client
            .post(&url)
            .json(&CreateDocumentRequest {
                incident_id: incident.id.to_string(),
                short_id: incident.short_id(),
                title: &incident.title,
                severity: incident.severity.as_str(),
            })
            .send()
            .await
            .map_err(|e| collaborator_error("document service", &e))?;

        if !response.status().is_success() {
            return Err(ResponderError::ExternalCollaborator(format!(
                "document service returned {}",
                response.status()
            )));
        }

        let body: CreateDocumentResponse = response
            .json()
            .await
            .map_err(|e| collaborator_error("document service", &e))?;
        Ok(body.link)
    }
}

/// Chat service speaking a JSON-over-HTTP channel API.
pub struct HttpChatService {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpChatService {
    /// Create a client for a chat service endpoint.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateChannelRequest<'a> {
    name: String,
    topic: &'a str,
    invitees: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CreateChannelResponse {
    link: String,
    channel_id: String,
}

#[async_trait]
impl ChatCollaborator for HttpChatService {
    async fn create_channel(
        &self,
        incident: &Incident,
        invitees: &[String],
    ) -> Result<(String, String), ResponderError> {
        let url = format!("{}/api/channels", self.endpoint);
        debug!(incident = %incident.short_id(), "Requesting war room creation");

        let response = self
            .client
            .post(&url)
            .json(&CreateChannelRequest {
                name: format!("inc-{}", incident.short_id().to_lowercase()),
                topic: &incident.title,
                invitees,
            })
            .send()
            .await
            .map_err(|e| collaborator_error("chat service", &e))?;

        if !response.status().is_success() {
            return Err(ResponderError::ExternalCollaborator(format!(
                "chat service returned {}",
                response.status()
            )));
        }

        let body: CreateChannelResponse = response
            .json()
            .await
            .map_err(|e| collaborator_error("chat service", &e))?;
        Ok((body.link, body.channel_id))
    }

    async fn archive_channel(&self, channel_id: &str) -> Result<(), ResponderError> {
        let url = format!("{}/api/channels/{channel_id}/archive", self.endpoint);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| collaborator_error("chat service", &e))?;

        if !response.status().is_success() {
            return Err(ResponderError::ExternalCollaborator(format!(
                "chat service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::Severity;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn incident() -> Incident {
        Incident::new("Redis down", "", Uuid::new_v4(), Severity::Critical, None)
    }

    #[tokio::test]
    async fn test_create_document_returns_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "link": "https://docs.example.com/d/42"
            })))
            .mount(&server)
            .await;

        let service = HttpDocumentService::new(server.uri(), 5);
        let link = service.create_document(&incident()).await.unwrap();
        assert_eq!(link, "https://docs.example.com/d/42");
    }

    #[tokio::test]
    async fn test_create_document_maps_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let service = HttpDocumentService::new(server.uri(), 5);
        let err = service.create_document(&incident()).await.unwrap_err();
        assert!(matches!(err, ResponderError::ExternalCollaborator(_)));
    }

    #[tokio::test]
    async fn test_create_channel_returns_link_and_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "link": "https://chat.example.com/C99",
                "channel_id": "C99"
            })))
            .mount(&server)
            .await;

        let service = HttpChatService::new(server.uri(), 5);
        let (link, id) = service
            .create_channel(&incident(), &["alice".to_string()])
            .await
            .unwrap();
        assert_eq!(link, "https://chat.example.com/C99");
        assert_eq!(id, "C99");
    }

    #[tokio::test]
    async fn test_archive_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/channels/C99/archive"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let service = HttpChatService::new(server.uri(), 5);
        service.archive_channel("C99").await.unwrap();
    }
}
