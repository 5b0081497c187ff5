//! Builds a [`NotificationRouter`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::channels::{
    ConsoleChannel, DiscordChannel, EmailChannel, GoogleChatChannel, NotificationChannel,
    SlackChannel, TelegramChannel, WebhookChannel,
};
use super::config::{ChannelConfig, NotificationsConfig};
use super::router::{EventFilter, NotificationRouter};

/// Instantiate one channel record. Unknown or broken records yield `None`.
pub fn build_channel(config: &ChannelConfig) -> Option<Arc<dyn NotificationChannel>> {
    let channel: Arc<dyn NotificationChannel> = match config {
        ChannelConfig::Console(c) => Arc::new(ConsoleChannel::new(c.clone())),
        ChannelConfig::Webhook(c) => Arc::new(WebhookChannel::new(c.clone())),
        ChannelConfig::Email(c) => match EmailChannel::new(c.clone()) {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                warn!(error = %e, "Skipping email channel");
                return None;
            }
        },
        ChannelConfig::Telegram(c) => Arc::new(TelegramChannel::new(c.clone())),
        ChannelConfig::Discord(c) => Arc::new(DiscordChannel::new(c.clone())),
        ChannelConfig::Slack(c) => Arc::new(SlackChannel::new(c.clone())),
        ChannelConfig::GoogleChat(c) => Arc::new(GoogleChatChannel::new(c.clone())),
        ChannelConfig::Unsupported => {
            warn!("Skipping channel with unsupported type");
            return None;
        }
    };
    Some(channel)
}

/// Build the router for a configuration.
///
/// A disabled configuration yields an empty router. Disabled records are
/// skipped.
pub fn build_router(config: &NotificationsConfig) -> NotificationRouter {
    let mut router = NotificationRouter::new()
        .with_default_timeout(Duration::from_secs(config.approval_timeout_secs));

    if !config.enabled {
        return router;
    }

    for record in &config.channels {
        if !record.is_enabled() {
            continue;
        }
        if let Some(channel) = build_channel(record) {
            router.register(channel, EventFilter::from_names(record.events()));
        }
    }

    info!(channels = router.channel_count(), "Notification router ready");
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::EventType;

    const CONFIG: &str = r#"
enabled = true
approval_timeout_secs = 120

[[channels]]
type = "console"
name = "term"

[[channels]]
type = "webhook"
url = "https://hooks.example.com/a"
events = ["session_completed"]

[[channels]]
type = "slack"
enabled = false
webhook_url = "https://hooks.slack.com/x"

[[channels]]
type = "carrier_pigeon"

[[channels]]
type = "telegram"
token = "123:ABC"
chat_id = "42"

[[channels]]
type = "email"
smtp_host = "smtp.example.com"
to_addrs = ["lab@example.com"]
"#;

    #[tokio::test]
    async fn test_build_router_from_config() {
        let config = NotificationsConfig::from_toml_str(CONFIG).unwrap();
        let router = build_router(&config);

        assert_eq!(router.channel_names(), ["term", "webhook", "telegram", "email"]);
        assert_eq!(router.default_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_disabled_config_builds_empty_router() {
        let mut config = NotificationsConfig::from_toml_str(CONFIG).unwrap();
        config.enabled = false;
        assert!(build_router(&config).is_empty());
    }

    #[test]
    fn test_unsupported_is_not_instantiated() {
        assert!(build_channel(&ChannelConfig::Unsupported).is_none());
    }

    #[test]
    fn test_filter_names_are_canonicalized() {
        let filter = EventFilter::from_names(&["SessionCompleted", "phase.failed"]);
        assert!(filter.matches(EventType::SessionCompleted));
        assert!(filter.matches(EventType::PhaseFailed));
        assert!(!filter.matches(EventType::Heartbeat));
    }
}
