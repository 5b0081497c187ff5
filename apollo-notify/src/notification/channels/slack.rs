//! Slack incoming-webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::NotificationChannel;
use crate::notification::events::{EventSeverity, NotificationEvent};
use crate::utils::http_client::{ManagedClient, post_json};
use crate::{Error, Result};

/// Slack channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// Incoming webhook URL.
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            events: Vec::new(),
            webhook_url: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Slack notification channel (Block Kit payloads).
pub struct SlackChannel {
    name: String,
    config: SlackConfig,
    client: ManagedClient,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            name: config.name.clone().unwrap_or_else(|| "slack".to_string()),
            config,
            client: ManagedClient::new(Duration::from_secs(30)),
        }
    }

    fn severity_emoji(severity: EventSeverity) -> &'static str {
        match severity {
            EventSeverity::Info => ":information_source:",
            EventSeverity::Warning => ":warning:",
            EventSeverity::Error => ":x:",
            EventSeverity::Critical => ":rotating_light:",
        }
    }

    fn build_payload(&self, event: &NotificationEvent) -> Value {
        let mut fields = Vec::new();
        if !event.phase().is_empty() {
            fields.push(json!({"type": "mrkdwn", "text": format!("*Phase:* {}", event.phase())}));
        }
        fields.push(json!({
            "type": "mrkdwn",
            "text": format!("*Session:* `{}`", event.session_id()),
        }));

        json!({
            "blocks": [
                {
                    "type": "header",
                    "text": {"type": "plain_text", "text": event.title()},
                },
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!("{} {}", Self::severity_emoji(event.severity()), event.summary()),
                    },
                },
                {"type": "section", "fields": fields},
                {"type": "divider"},
            ]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.client.connect();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect();
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        if self.config.webhook_url.is_empty() {
            return Err(Error::channel(&self.name, "no webhook url configured"));
        }

        let payload = self.build_payload(event);
        post_json(&self.client.get(), &self.name, &self.config.webhook_url, &payload).await?;

        debug!("Slack notification sent: {}", event.event_type());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::EventType;

    #[test]
    fn test_slack_config_default() {
        let config = SlackConfig::default();
        assert!(config.enabled);
        assert!(config.events.is_empty());

        let parsed: SlackConfig = serde_json::from_value(json!({"webhook_url": "https://hooks"})).unwrap();
        assert_eq!(parsed.enabled, config.enabled);
    }

    #[test]
    fn test_build_payload() {
        let channel = SlackChannel::new(SlackConfig::default());
        let event = NotificationEvent::new(EventType::BudgetWarning, "sess-9", "Budget at 80%", "$40 of $50")
            .with_severity(EventSeverity::Warning)
            .with_phase("analysis");

        let payload = channel.build_payload(&event);
        let blocks = payload["blocks"].as_array().unwrap();

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0]["text"]["text"], "Budget at 80%");
        assert_eq!(blocks[1]["text"]["text"], ":warning: $40 of $50");
        let fields = blocks[2]["fields"].as_array().unwrap();
        assert_eq!(fields[0]["text"], "*Phase:* analysis");
        assert_eq!(fields[1]["text"], "*Session:* `sess-9`");
        assert_eq!(blocks[3]["type"], "divider");
    }

    #[test]
    fn test_build_payload_without_phase() {
        let channel = SlackChannel::new(SlackConfig::default());
        let event = NotificationEvent::new(EventType::SessionStarted, "s", "Started", "go");

        let payload = channel.build_payload(&event);
        let fields = payload["blocks"][2]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 1);
    }
}
