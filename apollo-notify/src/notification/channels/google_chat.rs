//! Google Chat webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::NotificationChannel;
use crate::notification::events::{EventSeverity, NotificationEvent};
use crate::utils::http_client::{ManagedClient, post_json};
use crate::{Error, Result};

/// Google Chat channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleChatConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// Space webhook URL.
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for GoogleChatConfig {
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

/// Google Chat notification channel (cardsV2 payloads).
pub struct GoogleChatChannel {
    name: String,
    config: GoogleChatConfig,
    client: ManagedClient,
}

impl GoogleChatChannel {
    pub fn new(config: GoogleChatConfig) -> Self {
        Self {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| "google_chat".to_string()),
            config,
            client: ManagedClient::new(Duration::from_secs(30)),
        }
    }

    fn severity_icon(severity: EventSeverity) -> &'static str {
        match severity {
            EventSeverity::Info => "BOOKMARK",
            EventSeverity::Warning => "DESCRIPTION",
            EventSeverity::Error => "BUG_REPORT",
            EventSeverity::Critical => "URGENT",
        }
    }

    fn build_card(&self, event: &NotificationEvent) -> Value {
        let mut widgets = vec![json!({
            "decoratedText": {
                "text": event.summary(),
                "startIcon": {"knownIcon": Self::severity_icon(event.severity())},
            }
        })];

        if !event.phase().is_empty() {
            widgets.push(json!({
                "decoratedText": {"topLabel": "Phase", "text": event.phase()}
            }));
        }

        widgets.push(json!({
            "decoratedText": {"topLabel": "Session", "text": event.session_id()}
        }));

        json!({
            "cardsV2": [{
                "cardId": format!("apollo-{}", event.event_type()),
                "card": {
                    "header": {
                        "title": event.title(),
                        "subtitle": format!("ApolloBot | {}", event.event_type()),
                    },
                    "sections": [{"widgets": widgets}],
                },
            }]
        })
    }
}

#[async_trait]
impl NotificationChannel for GoogleChatChannel {
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

        let card = self.build_card(event);
        post_json(&self.client.get(), &self.name, &self.config.webhook_url, &card).await?;

        debug!("Google Chat notification sent: {}", event.event_type());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::EventType;

    #[test]
    fn test_google_chat_config_default() {
        let config = GoogleChatConfig::default();
        assert!(config.enabled);

        let parsed: GoogleChatConfig = serde_json::from_value(json!({"webhook_url": "https://chat"})).unwrap();
        assert_eq!(parsed.enabled, config.enabled);
    }

    #[test]
    fn test_build_card() {
        let channel = GoogleChatChannel::new(GoogleChatConfig::default());
        let event = NotificationEvent::new(EventType::PhaseFailed, "sess-3", "Analysis failed", "timeout")
            .with_severity(EventSeverity::Error)
            .with_phase("analysis");

        let card = channel.build_card(&event);
        let entry = &card["cardsV2"][0];

        assert_eq!(entry["cardId"], "apollo-phase_failed");
        assert_eq!(entry["card"]["header"]["title"], "Analysis failed");
        assert_eq!(entry["card"]["header"]["subtitle"], "ApolloBot | phase_failed");

        let widgets = entry["card"]["sections"][0]["widgets"].as_array().unwrap();
        assert_eq!(widgets.len(), 3);
        assert_eq!(widgets[0]["decoratedText"]["startIcon"]["knownIcon"], "BUG_REPORT");
        assert_eq!(widgets[1]["decoratedText"]["text"], "analysis");
        assert_eq!(widgets[2]["decoratedText"]["text"], "sess-3");
    }
}
