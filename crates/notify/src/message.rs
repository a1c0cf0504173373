//! Channel-neutral message and addressing types.
//!
//! The router computes `RecipientTarget`s; providers consume them together
//! with a `Message`. Providers decide how to render the message for their
//! transport (attachments, plain text, HTML).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification channel classes.
///
/// Each class maps to exactly one configured provider in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Chat message (team channel or direct message)
    Chat,
    /// Email delivery
    Email,
    /// SMS delivery (urgent channel class)
    Sms,
    /// Generic webhook POST
    Webhook,
}

impl ChannelType {
    /// Display name for this channel class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
        }
    }
}

/// Delivery priority hint attached to a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

/// A single delivery destination computed by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientTarget {
    /// Channel class to deliver on
    pub channel: ChannelType,
    /// Channel-specific address (channel ID, email, phone number, URL)
    pub address: String,
    /// Priority hint for the provider
    #[serde(default)]
    pub priority: Priority,
}

impl RecipientTarget {
    /// Create a normal-priority target.
    #[must_use]
    pub fn new(channel: ChannelType, address: impl Into<String>) -> Self {
        Self {
            channel,
            address: address.into(),
            priority: Priority::Normal,
        }
    }

    /// Create an urgent target.
    #[must_use]
    pub fn urgent(channel: ChannelType, address: impl Into<String>) -> Self {
        Self {
            channel,
            address: address.into(),
            priority: Priority::Urgent,
        }
    }

    /// Key used to deduplicate targets within one routing computation.
    #[must_use]
    pub fn dedup_key(&self) -> (ChannelType, &str) {
        (self.channel, self.address.as_str())
    }
}

/// Severity of a notification, used for provider-side color coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Get the embed/attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> u32 {
        match self {
            Self::Info => 0x0034_98db,     // Blue
            Self::Warning => 0x00f3_9c12,  // Orange
            Self::Critical => 0x00e7_4c3c, // Red
        }
    }

    /// Hex color string for providers that take CSS-style colors.
    #[must_use]
    pub const fn hex_color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",
            Self::Warning => "#f39c12",
            Self::Critical => "#e74c3c",
        }
    }

    /// Display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Channel-neutral notification content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Short headline
    pub title: String,
    /// Main body text
    pub body: String,
    /// Severity for color coding
    pub severity: Severity,
    /// Structured key/value context shown as fields where supported
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    /// Links (document, war room, runbook) rendered as a trailing block
    #[serde(default)]
    pub links: Vec<String>,
    /// When the underlying event occurred
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with the given title, body and severity.
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity,
            fields: vec![],
            links: vec![],
            timestamp: Utc::now(),
        }
    }

    /// Add a structured field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Add a link line.
    #[must_use]
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.links.push(link.into());
        self
    }

    /// Render the body plus the link block as plain text.
    #[must_use]
    pub fn plain_text(&self) -> String {
        if self.links.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.body, self.links.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.color(), 0x0034_98db);
        assert_eq!(Severity::Warning.color(), 0x00f3_9c12);
        assert_eq!(Severity::Critical.color(), 0x00e7_4c3c);
    }

    #[test]
    fn test_dedup_key() {
        let a = RecipientTarget::new(ChannelType::Chat, "C012345");
        let b = RecipientTarget::urgent(ChannelType::Chat, "C012345");
        // Priority does not participate in deduplication
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = RecipientTarget::new(ChannelType::Email, "C012345");
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_plain_text_with_links() {
        let msg = Message::new("Title", "Body", Severity::Info)
            .with_link("Doc: https://docs.example.com/d/1");
        assert!(msg.plain_text().contains("Body\n\n"));
        assert!(msg.plain_text().contains("Doc: https://"));

        let bare = Message::new("Title", "Body", Severity::Info);
        assert_eq!(bare.plain_text(), "Body");
    }
}
