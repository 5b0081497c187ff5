//! Discord notification channel.
//!
//! Ordinary events go out through an incoming webhook. Approval requests are
//! posted through the bot API instead so the bot can seed ✅ / ❌ reactions
//! and later read who reacted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::NotificationChannel;
use crate::notification::events::{EventSeverity, NotificationEvent};
use crate::utils::http_client::ManagedClient;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const APPROVE_EMOJI: &str = "\u{2705}";
const DENY_EMOJI: &str = "\u{274c}";

/// Discord channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// Discord webhook URL.
    #[serde(default)]
    pub webhook_url: String,
    /// Bot token used for approval messages and reaction polling.
    #[serde(default)]
    pub bot_token: String,
    /// Channel the bot posts approval messages to.
    #[serde(default)]
    pub channel_id: String,
    /// Seconds between reaction polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            events: Vec::new(),
            webhook_url: String::new(),
            bot_token: String::new(),
            channel_id: String::new(),
            poll_interval_secs: default_poll_interval(),
            api_base: default_api_base(),
        }
    }
}

/// Discord notification channel.
pub struct DiscordChannel {
    name: String,
    config: DiscordConfig,
    supports_responses: bool,
    client: ManagedClient,
    /// Approval message ids keyed by `session:phase`.
    pending_messages: Mutex<HashMap<String, String>>,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    pub fn new(config: DiscordConfig) -> Self {
        let supports_responses = !config.bot_token.is_empty() && !config.channel_id.is_empty();
        if !supports_responses {
            debug!("Discord channel has no bot credentials; approvals disabled");
        }

        Self {
            name: config.name.clone().unwrap_or_else(|| "discord".to_string()),
            supports_responses,
            client: ManagedClient::new(Duration::from_secs(30)),
            pending_messages: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get the embed color based on severity.
    fn get_color(severity: EventSeverity) -> u32 {
        match severity {
            EventSeverity::Info => 0x3498db,     // Blue
            EventSeverity::Warning => 0xf39c12,  // Orange
            EventSeverity::Error => 0xe74c3c,    // Red
            EventSeverity::Critical => 0x8e44ad, // Purple
        }
    }

    fn build_embed(&self, event: &NotificationEvent) -> Value {
        let mut embed = json!({
            "title": event.title(),
            "description": event.summary(),
            "color": Self::get_color(event.severity()),
            "timestamp": event.timestamp_rfc3339(),
            "footer": {
                "text": format!("Session: {}", event.session_id())
            }
        });

        if !event.phase().is_empty() {
            embed["fields"] = json!([{"name": "Phase", "value": event.phase(), "inline": true}]);
        }

        embed
    }

    /// Build the message payload for an event.
    fn build_payload(&self, event: &NotificationEvent) -> Value {
        json!({ "embeds": [self.build_embed(event)] })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/channels/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.channel_id
        )
    }

    fn reaction_url(&self, message_id: &str, emoji: &str) -> String {
        format!(
            "{}/{}/reactions/{}",
            self.messages_url(),
            message_id,
            urlencoding::encode(emoji)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            reqwest::header::AUTHORIZATION,
            format!("Bot {}", self.config.bot_token),
        )
    }

    /// Send request with rate limit handling.
    /// Retries on 429 responses respecting the Retry-After header.
    async fn send_with_retry<F>(&self, make_request: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = make_request().send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(&response);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Discord rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::channel(
                        &self.name,
                        format!("rate limit exceeded after {} retries", MAX_RATE_LIMIT_RETRIES),
                    ));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            // Other error - don't retry
            let body = response.text().await.unwrap_or_default();
            return Err(Error::channel(
                &self.name,
                format!("HTTP {} - {}", status, body),
            ));
        }
    }

    async fn send_via_webhook(&self, client: &Client, event: &NotificationEvent) -> Result<()> {
        if self.config.webhook_url.is_empty() {
            return Err(Error::channel(&self.name, "no webhook url configured"));
        }

        let payload = self.build_payload(event);
        self.send_with_retry(|| client.post(&self.config.webhook_url).json(&payload))
            .await?;
        Ok(())
    }

    /// Post the approval message through the bot and seed the reactions.
    async fn send_via_bot(&self, client: &Client, event: &NotificationEvent) -> Result<()> {
        let payload = self.build_payload(event);
        let url = self.messages_url();
        let response = self
            .send_with_retry(|| self.authorized(client.post(&url)).json(&payload))
            .await?;

        let message: Value = response.json().await?;
        let message_id = message
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::channel(&self.name, "bot message response has no id"))?
            .to_string();

        for emoji in [APPROVE_EMOJI, DENY_EMOJI] {
            let url = format!("{}/@me", self.reaction_url(&message_id, emoji));
            if let Err(e) = self.send_with_retry(|| self.authorized(client.put(&url))).await {
                warn!(channel = %self.name, error = %e, "Failed to add approval reaction");
            }
        }

        self.pending_messages
            .lock()
            .insert(event.approval_key(), message_id);
        Ok(())
    }

    /// Whether a non-bot user has reacted with `emoji`.
    async fn human_reacted(&self, client: &Client, message_id: &str, emoji: &str) -> Result<bool> {
        let response = self
            .authorized(client.get(self.reaction_url(message_id, emoji)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::channel(
                &self.name,
                format!("reaction poll failed: {}", response.status()),
            ));
        }

        let users: Value = response.json().await?;
        Ok(has_human_user(&users))
    }
}

/// Forgets a watched approval message when the wait ends or is dropped.
struct PendingEntry<'a> {
    messages: &'a Mutex<HashMap<String, String>>,
    key: String,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.messages.lock().remove(&self.key);
    }
}

/// Parse the Retry-After duration from a 429 response.
fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    // Try Retry-After header first (Discord sets this)
    if let Some(retry_after) = response.headers().get("Retry-After")
        && let Ok(secs) = retry_after.to_str().ok()?.parse::<f64>()
    {
        return Some(Duration::from_secs_f64(secs));
    }

    // Fallback: try X-RateLimit-Reset-After header
    if let Some(reset_after) = response.headers().get("X-RateLimit-Reset-After")
        && let Ok(secs) = reset_after.to_str().ok()?.parse::<f64>()
    {
        return Some(Duration::from_secs_f64(secs));
    }

    None
}

fn has_human_user(users: &Value) -> bool {
    users.as_array().is_some_and(|users| {
        users
            .iter()
            .any(|u| !u.get("bot").and_then(Value::as_bool).unwrap_or(false))
    })
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_responses(&self) -> bool {
        self.supports_responses
    }

    async fn connect(&self) -> Result<()> {
        self.client.connect();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect();
        self.pending_messages.lock().clear();
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let client = self.client.get();

        if event.requires_response() && self.supports_responses {
            self.send_via_bot(&client, event).await?;
        } else {
            self.send_via_webhook(&client, event).await?;
        }

        debug!("Discord notification sent: {}", event.event_type());
        Ok(())
    }

    async fn wait_for_response(&self, event: &NotificationEvent, timeout: Duration) -> Result<bool> {
        if !self.supports_responses {
            return Ok(true);
        }

        let key = event.approval_key();
        let Some(message_id) = self.pending_messages.lock().get(&key).cloned() else {
            warn!(channel = %self.name, key = %key, "No approval message to watch, auto-approving");
            return Ok(true);
        };
        let _pending = PendingEntry {
            messages: &self.pending_messages,
            key,
        };

        let client = self.client.get();
        let deadline = Instant::now() + timeout;
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        let decision = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break None;
            }
            tokio::time::sleep(interval.min(remaining)).await;

            let mut found = None;
            for (emoji, approved) in [(APPROVE_EMOJI, true), (DENY_EMOJI, false)] {
                match self.human_reacted(&client, &message_id, emoji).await {
                    Ok(true) => {
                        found = Some(approved);
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => debug!(channel = %self.name, error = %e, "Discord poll error"),
                }
            }
            if found.is_some() {
                break found;
            }
        };

        match decision {
            Some(approved) => {
                info!(channel = %self.name, phase = %event.phase(), approved, "Checkpoint answered");
                Ok(approved)
            }
            None => {
                info!(channel = %self.name, phase = %event.phase(), "Approval timed out, auto-approving");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::EventType;

    fn bot_config() -> DiscordConfig {
        DiscordConfig {
            webhook_url: "https://discord.com/api/webhooks/123/abc".to_string(),
            bot_token: "bot-token".to_string(),
            channel_id: "987".to_string(),
            ..Default::default()
        }
    }

    fn unreachable_config() -> DiscordConfig {
        DiscordConfig {
            webhook_url: "http://127.0.0.1:1/webhook".to_string(),
            poll_interval_secs: 1,
            api_base: "http://127.0.0.1:1".to_string(),
            ..bot_config()
        }
    }

    fn approval_event() -> NotificationEvent {
        NotificationEvent::new(EventType::CheckpointApproval, "s", "Approval needed: x", "")
            .with_phase("x")
            .requiring_response()
    }

    #[test]
    fn test_discord_config_default() {
        let config = DiscordConfig::default();
        assert!(config.enabled);
        assert!(config.webhook_url.is_empty());
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_demotes_without_bot_credentials() {
        let channel = DiscordChannel::new(DiscordConfig {
            webhook_url: "https://discord.com/api/webhooks/123/abc".to_string(),
            bot_token: "bot-token".to_string(),
            ..Default::default()
        });
        assert!(!channel.supports_responses());
        assert!(DiscordChannel::new(bot_config()).supports_responses());
    }

    #[test]
    fn test_get_color() {
        assert_eq!(DiscordChannel::get_color(EventSeverity::Info), 0x3498db);
        assert_eq!(DiscordChannel::get_color(EventSeverity::Warning), 0xf39c12);
        assert_eq!(DiscordChannel::get_color(EventSeverity::Error), 0xe74c3c);
        assert_eq!(DiscordChannel::get_color(EventSeverity::Critical), 0x8e44ad);
    }

    #[test]
    fn test_build_payload() {
        let channel = DiscordChannel::new(bot_config());
        let event = NotificationEvent::new(EventType::PhaseCompleted, "sess-2", "Phase complete: plan", "done")
            .with_phase("plan");

        let payload = channel.build_payload(&event);
        let embed = &payload["embeds"][0];

        assert_eq!(embed["title"], "Phase complete: plan");
        assert_eq!(embed["description"], "done");
        assert_eq!(embed["color"], 0x3498db);
        assert_eq!(embed["footer"]["text"], "Session: sess-2");
        assert_eq!(embed["fields"][0]["value"], "plan");
    }

    #[test]
    fn test_build_payload_without_phase() {
        let channel = DiscordChannel::new(bot_config());
        let event = NotificationEvent::new(EventType::SessionStarted, "sess-2", "Started", "go");
        let payload = channel.build_payload(&event);
        assert!(payload["embeds"][0].get("fields").is_none());
    }

    #[test]
    fn test_reaction_url_encodes_emoji() {
        let channel = DiscordChannel::new(bot_config());
        assert_eq!(
            channel.reaction_url("555", APPROVE_EMOJI),
            "https://discord.com/api/v10/channels/987/messages/555/reactions/%E2%9C%85"
        );
    }

    #[test]
    fn test_has_human_user() {
        assert!(!has_human_user(&json!([{"id": "1", "bot": true}])));
        assert!(has_human_user(&json!([{"id": "1", "bot": true}, {"id": "2"}])));
        assert!(!has_human_user(&json!([])));
        assert!(!has_human_user(&json!({"message": "Unknown Message"})));
    }

    #[tokio::test]
    async fn test_wait_without_message_auto_approves() {
        let channel = DiscordChannel::new(bot_config());
        let approved = channel
            .wait_for_response(&approval_event(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(approved);
    }

    #[tokio::test]
    async fn test_unreachable_api_fails_send_then_approves() {
        let channel = DiscordChannel::new(unreachable_config());
        let event = approval_event();

        assert!(channel.send(&event).await.is_err());
        assert!(channel.pending_messages.lock().is_empty());

        let approved = channel
            .wait_for_response(&event, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(approved);
    }

    #[tokio::test]
    async fn test_poll_errors_keep_polling_until_timeout() {
        let channel = DiscordChannel::new(unreachable_config());
        let event = approval_event();
        channel
            .pending_messages
            .lock()
            .insert(event.approval_key(), "555".to_string());

        let start = Instant::now();
        let approved = channel
            .wait_for_response(&event, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(approved);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(channel.pending_messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_wait_forgets_message() {
        let channel = DiscordChannel::new(unreachable_config());
        let event = approval_event();
        channel
            .pending_messages
            .lock()
            .insert(event.approval_key(), "555".to_string());

        let wait = channel.wait_for_response(&event, Duration::from_secs(60));
        let result = tokio::time::timeout(Duration::from_millis(1500), wait).await;

        assert!(result.is_err());
        assert!(channel.pending_messages.lock().is_empty());
    }
}
