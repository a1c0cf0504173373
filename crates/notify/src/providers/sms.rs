//! SMS gateway provider.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::{ChannelType, Message, RecipientTarget};
use crate::providers::Provider;

/// Maximum characters in a single SMS segment.
const SMS_MAX_LEN: usize = 160;

/// SMS provider speaking an HTTP gateway API (OVH-style jobs endpoint).
pub struct SmsProvider {
    endpoint: String,
    api_key: String,
    sender: String,
    client: reqwest::Client,
}

impl SmsProvider {
    /// Create an SMS provider for a gateway endpoint.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        sender: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            sender: sender.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Collapse a message into a single SMS segment.
    fn render_text(message: &Message) -> String {
        let text = format!("{}: {}", message.title, message.body.replace('\n', " "));
        if text.chars().count() <= SMS_MAX_LEN {
            return text;
        }

        let truncated: String = text.chars().take(SMS_MAX_LEN - 3).collect();
        format!("{truncated}...")
    }
}

#[async_trait]
impl Provider for SmsProvider {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn channel(&self) -> ChannelType {
        ChannelType::Sms
    }

    async fn send(&self, target: &RecipientTarget, message: &Message) -> Result<(), ChannelError> {
        let payload = SmsPayload {
            sender: self.sender.clone(),
            receivers: vec![target.address.clone()],
            message: Self::render_text(message),
            no_stop_clause: true,
        };

        debug!(channel = "sms", address = %target.address, "Sending notification");

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
            warn!(channel = "sms", status = %status, "SMS send failed");
            Err(ChannelError::Rejected(format!(
                "SMS gateway returned {status}"
            )))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SmsPayload {
    sender: String,
    receivers: Vec<String>,
    message: String,
    no_stop_clause: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Severity;

    #[test]
    fn test_render_text_short_message() {
        let message = Message::new("INC-A1B2", "Redis down", Severity::Critical);
        assert_eq!(SmsProvider::render_text(&message), "INC-A1B2: Redis down");
    }

    #[test]
    fn test_render_text_truncates_to_one_segment() {
        let message = Message::new("INC-A1B2", "x".repeat(400), Severity::Critical);
        let text = SmsProvider::render_text(&message);
        assert_eq!(text.chars().count(), SMS_MAX_LEN);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn test_render_text_flattens_newlines() {
        let message = Message::new("INC", "line one\nline two", Severity::Warning);
        assert!(!SmsProvider::render_text(&message).contains('\n'));
    }
}
