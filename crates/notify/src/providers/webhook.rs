//! Generic webhook provider.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::{ChannelType, Message, Priority, RecipientTarget};
use crate::providers::Provider;

/// Generic webhook provider.
///
/// Posts the message as JSON to the target address itself, so a single
/// registry entry can fan out to arbitrary downstream receivers.
pub struct WebhookProvider {
    client: reqwest::Client,
}

impl WebhookProvider {
    /// Create a webhook provider.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn channel(&self) -> ChannelType {
        ChannelType::Webhook
    }

    async fn send(&self, target: &RecipientTarget, message: &Message) -> Result<(), ChannelError> {
        let payload = WebhookPayload {
            title: &message.title,
            body: &message.body,
            severity: message.severity.as_str(),
            urgent: target.priority == Priority::Urgent,
            fields: &message.fields,
            links: &message.links,
            timestamp: message.timestamp.to_rfc3339(),
        };

        debug!(channel = "webhook", address = %target.address, "Sending notification");

        let response = self
            .client
            .post(&target.address)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            warn!(channel = "webhook", status = %status, "Webhook delivery failed");
            Err(ChannelError::Rejected(format!(
                "Webhook returned {status}"
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
    severity: &'a str,
    urgent: bool,
    fields: &'a [(String, String)],
    links: &'a [String],
    timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Severity;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_message_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "title": "INC-A1B2",
                "severity": "Critical",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = WebhookProvider::new(10);
        let target = RecipientTarget::new(ChannelType::Webhook, server.uri());
        let message = Message::new("INC-A1B2", "Redis down", Severity::Critical);

        provider
            .send(&target, &message)
            .await
            .expect("send should succeed");
    }
}
