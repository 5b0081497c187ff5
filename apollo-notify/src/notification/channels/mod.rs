//! Notification channels.
//!
//! This module provides the transports an event can be delivered through:
//! - Console (local terminal output)
//! - Generic webhooks (HTTP POST, optional HMAC signature)
//! - Slack and Google Chat incoming webhooks
//! - Telegram Bot API (bidirectional, inline keyboard)
//! - Discord webhook / bot API (bidirectional, reactions)
//! - Email (SMTP, batched)
//! - An in-memory mock with scripted responses

mod console;
mod discord;
mod email;
mod google_chat;
mod mock;
mod slack;
mod telegram;
mod webhook;

pub use console::{ConsoleChannel, ConsoleConfig};
pub use discord::{DiscordChannel, DiscordConfig};
pub use email::{EmailChannel, EmailConfig, MailTransport, OutgoingMail, SmtpTransport};
pub use google_chat::{GoogleChatChannel, GoogleChatConfig};
pub use mock::MockChannel;
pub use slack::{SlackChannel, SlackConfig};
pub use telegram::{TelegramChannel, TelegramConfig};
pub use webhook::{SIGNATURE_HEADER, WebhookAuth, WebhookChannel, WebhookConfig};

use std::time::Duration;

use async_trait::async_trait;

use super::events::NotificationEvent;
use crate::Result;

/// Default time a bidirectional channel waits for a human decision.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Trait for notification channels.
///
/// Every operation may suspend on network I/O. Implementations report
/// transport failures through `Err`; the router decides what to do with them.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name, used in logs and as the registration label.
    fn name(&self) -> &str;

    /// Whether [`NotificationChannel::wait_for_response`] yields a real
    /// human decision. Fixed for the lifetime of the instance.
    fn supports_responses(&self) -> bool {
        false
    }

    /// Establish transport state (HTTP client, bot session). Idempotent.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Tear down transport state. Idempotent.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver an event through this channel.
    async fn send(&self, event: &NotificationEvent) -> Result<()>;

    /// Wait for an approve (`true`) or deny (`false`) decision on `event`.
    ///
    /// Channels without response support approve immediately. Expiry of
    /// `timeout` also resolves to `true`. Dropping the returned future stops
    /// any polling.
    async fn wait_for_response(
        &self,
        _event: &NotificationEvent,
        _timeout: Duration,
    ) -> Result<bool> {
        Ok(true)
    }

    /// Send a synthetic event to check the channel configuration.
    async fn test(&self) -> Result<()> {
        self.send(&NotificationEvent::test_event()).await
    }
}
