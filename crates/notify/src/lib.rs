//! Notification channel providers for the responder platform.
//!
//! This crate provides the delivery side of incident notifications: a
//! [`Provider`] trait with one reqwest-backed implementation per channel
//! type, and a [`ProviderRegistry`] that selects the provider for a target
//! by its channel class.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use notify::{ChannelType, Message, ProviderRegistry, RecipientTarget, Severity, SlackProvider};
//!
//! # async fn example() {
//! let mut registry = ProviderRegistry::empty();
//! registry.register(Arc::new(SlackProvider::new("https://hooks.slack.com/services/T0/B0/x", 10)));
//!
//! let target = RecipientTarget::new(ChannelType::Chat, "C0123456789");
//! let message = Message::new("Incident", "Redis is down", Severity::Critical);
//! let _ = registry.send(&target, &message).await;
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`Provider`] defines the send contract: `send(target, message)`.
//! - [`SlackProvider`], [`EmailProvider`], [`SmsProvider`] and
//!   [`WebhookProvider`] implement it for their transports.
//! - [`ProviderRegistry`] is a tagged lookup keyed by [`ChannelType`]; a
//!   target whose channel has no registered provider fails with
//!   [`ChannelError::NotConfigured`] without affecting other targets.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod message;
pub mod providers;

pub use error::ChannelError;
pub use message::{ChannelType, Message, Priority, RecipientTarget, Severity};
pub use providers::email::EmailProvider;
pub use providers::slack::SlackProvider;
pub use providers::sms::SmsProvider;
pub use providers::webhook::WebhookProvider;
pub use providers::Provider;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of configured providers, keyed by channel class.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ChannelType, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create a registry with no providers (for testing or dry runs).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider for its channel class, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.channel(), provider);
    }

    /// Check whether a provider is registered for a channel class.
    #[must_use]
    pub fn has_channel(&self, channel: ChannelType) -> bool {
        self.providers.contains_key(&channel)
    }

    /// Get the number of registered providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Look up the provider for a channel class.
    #[must_use]
    pub fn get(&self, channel: ChannelType) -> Option<&Arc<dyn Provider>> {
        self.providers.get(&channel)
    }

    /// Send a message to a single target through its channel's provider.
    ///
    /// # Errors
    /// Returns [`ChannelError::NotConfigured`] when the target's channel has
    /// no registered provider, or the provider's own error on failure.
    pub async fn send(
        &self,
        target: &RecipientTarget,
        message: &Message,
    ) -> Result<(), ChannelError> {
        let Some(provider) = self.providers.get(&target.channel) else {
            debug!(
                channel = target.channel.as_str(),
                "No provider registered, skipping target"
            );
            return Err(ChannelError::NotConfigured(
                target.channel.as_str().to_string(),
            ));
        };

        provider.send(target, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullProvider(ChannelType);

    #[async_trait]
    impl Provider for NullProvider {
        fn name(&self) -> &'static str {
            "null"
        }

        fn channel(&self) -> ChannelType {
            self.0
        }

        async fn send(&self, _: &RecipientTarget, _: &Message) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::empty();
        assert_eq!(registry.provider_count(), 0);
        assert!(!registry.has_channel(ChannelType::Chat));
    }

    #[tokio::test]
    async fn test_send_without_provider_is_not_configured() {
        let registry = ProviderRegistry::empty();
        let target = RecipientTarget::new(ChannelType::Sms, "+33600000000");
        let message = Message::new("t", "b", Severity::Info);

        let err = registry.send(&target, &message).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_register_replaces_by_channel() {
        let mut registry = ProviderRegistry::empty();
        registry.register(Arc::new(NullProvider(ChannelType::Chat)));
        registry.register(Arc::new(NullProvider(ChannelType::Chat)));
        assert_eq!(registry.provider_count(), 1);

        let target = RecipientTarget::new(ChannelType::Chat, "C1");
        let message = Message::new("t", "b", Severity::Info);
        registry.send(&target, &message).await.expect("send ok");
    }
}
