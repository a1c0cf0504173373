//! Notification provider implementations.

pub mod email;
pub mod slack;
pub mod sms;
pub mod webhook;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::message::{ChannelType, Message, RecipientTarget};

/// Trait for notification providers (Slack, email, SMS, webhook).
///
/// One implementation per channel type; the registry selects the provider
/// by the target's channel class.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &'static str;

    /// Get the channel class this provider delivers on.
    fn channel(&self) -> ChannelType;

    /// Send a message to a single target.
    async fn send(&self, target: &RecipientTarget, message: &Message) -> Result<(), ChannelError>;
}
