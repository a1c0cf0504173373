//! HTTP transactional email provider.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::{ChannelType, Message, RecipientTarget};
use crate::providers::Provider;

/// Transactional email provider speaking a JSON-over-HTTP send API.
pub struct EmailProvider {
    endpoint: String,
    api_key: String,
    from_address: String,
    client: reqwest::Client,
}

impl EmailProvider {
    /// Create an email provider for a transactional send endpoint.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from_address: from_address.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Render the message as a minimal HTML body.
    fn render_html(message: &Message) -> String {
        let mut html = String::new();
        html.push_str(&format!("<h2>{}</h2>\n", message.title));
        html.push_str(&format!("<p>{}</p>\n", message.body.replace('\n', "<br>")));

        if !message.fields.is_empty() {
            html.push_str("<ul>\n");
            for (name, value) in &message.fields {
                html.push_str(&format!("<li><b>{name}:</b> {value}</li>\n"));
            }
            html.push_str("</ul>\n");
        }

        for link in &message.links {
            html.push_str(&format!("<p>{link}</p>\n"));
        }

        html
    }
}

#[async_trait]
impl Provider for EmailProvider {
    fn name(&self) -> &'static str {
        "email"
    }

    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(&self, target: &RecipientTarget, message: &Message) -> Result<(), ChannelError> {
        let payload = EmailPayload {
            from: self.from_address.clone(),
            to: vec![target.address.clone()],
            subject: message.title.clone(),
            text: message.plain_text(),
            html: Self::render_html(message),
        };

        debug!(channel = "email", address = %target.address, "Sending notification");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            warn!(channel = "email", status = %status, "Email send failed");
            Err(ChannelError::Rejected(format!(
                "Email API returned {status}"
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct EmailPayload {
    from: String,
    to: Vec<String>,
    subject: String,
    text: String,
    html: String,
}
