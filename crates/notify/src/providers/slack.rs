//! Slack webhook chat provider.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::{ChannelType, Message, Priority, RecipientTarget};
use crate::providers::Provider;

/// Slack webhook notification provider.
///
/// Delivers to channels and user DMs through an incoming-webhook URL; the
/// target address is passed as the `channel` override in the payload.
pub struct SlackProvider {
    webhook_url: String,
    author_name: String,
    client: reqwest::Client,
}

impl SlackProvider {
    /// Create a Slack provider for a specific webhook URL.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            author_name: "Responder".to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Format a message as a Slack webhook payload.
    fn format_payload(&self, target: &RecipientTarget, message: &Message) -> SlackPayload {
        let fields = message
            .fields
            .iter()
            .map(|(name, value)| SlackField {
                title: name.clone(),
                value: value.clone(),
                short: true,
            })
            .collect();

        let title = if target.priority == Priority::Urgent {
            format!("🚨 {}", message.title)
        } else {
            message.title.clone()
        };

        let attachment = SlackAttachment {
            fallback: title.clone(),
            color: message.severity.hex_color().to_string(),
            author_name: Some(self.author_name.clone()),
            title,
            text: message.plain_text(),
            fields,
            footer: Some(format!(
                "{} | {}",
                message.severity.as_str(),
                message.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(message.timestamp.timestamp()),
        };

        SlackPayload {
            channel: Some(target.address.clone()),
            attachments: vec![attachment],
        }
    }
}

#[async_trait]
impl Provider for SlackProvider {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn channel(&self) -> ChannelType {
        ChannelType::Chat
    }

    async fn send(&self, target: &RecipientTarget, message: &Message) -> Result<(), ChannelError> {
        let payload = self.format_payload(target, message);

        debug!(channel = "slack", address = %target.address, "Sending notification");

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Rejected(format!(
                "Slack returned {status}: {body}"
            )))
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}
