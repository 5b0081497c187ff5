//! Notification configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! enabled = true
//! heartbeat_interval_secs = 300
//!
//! [[channels]]
//! type = "console"
//!
//! [[channels]]
//! type = "webhook"
//! url = "https://hooks.example.com/apollo"
//! secret = "s3cret"
//! events = ["session_completed", "session.failed"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::channels::{
    ConsoleConfig, DiscordConfig, EmailConfig, GoogleChatConfig, SlackConfig, TelegramConfig,
    WebhookConfig,
};
use crate::{Error, Result};

/// Top-level notifications configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Master switch. A disabled config builds an empty router.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between heartbeats; 0 disables them.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// How long an approval request waits for a human.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Channel records, in registration order.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_heartbeat_interval() -> u64 {
    300
}

fn default_approval_timeout() -> u64 {
    3600
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_interval_secs: default_heartbeat_interval(),
            approval_timeout_secs: default_approval_timeout(),
            channels: Vec::new(),
        }
    }
}

impl NotificationsConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Configuration for a single notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Local terminal output.
    Console(ConsoleConfig),
    /// Generic HTTP webhook.
    Webhook(WebhookConfig),
    /// Batched SMTP email.
    Email(EmailConfig),
    /// Telegram Bot API channel.
    Telegram(TelegramConfig),
    /// Discord webhook / bot channel.
    Discord(DiscordConfig),
    /// Slack incoming webhook.
    Slack(SlackConfig),
    /// Google Chat space webhook.
    GoogleChat(GoogleChatConfig),
    /// Any `type` this build does not know. Never instantiated.
    #[serde(other)]
    Unsupported,
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Console(_) => "console",
            Self::Webhook(_) => "webhook",
            Self::Email(_) => "email",
            Self::Telegram(_) => "telegram",
            Self::Discord(_) => "discord",
            Self::Slack(_) => "slack",
            Self::GoogleChat(_) => "google_chat",
            Self::Unsupported => "unsupported",
        }
    }

    /// Check if the channel is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Console(c) => c.enabled,
            Self::Webhook(c) => c.enabled,
            Self::Email(c) => c.enabled,
            Self::Telegram(c) => c.enabled,
            Self::Discord(c) => c.enabled,
            Self::Slack(c) => c.enabled,
            Self::GoogleChat(c) => c.enabled,
            Self::Unsupported => false,
        }
    }

    /// Raw event filter names.
    pub fn events(&self) -> &[String] {
        match self {
            Self::Console(c) => &c.events,
            Self::Webhook(c) => &c.events,
            Self::Email(c) => &c.events,
            Self::Telegram(c) => &c.events,
            Self::Discord(c) => &c.events,
            Self::Slack(c) => &c.events,
            Self::GoogleChat(c) => &c.events,
            Self::Unsupported => &[],
        }
    }
}
