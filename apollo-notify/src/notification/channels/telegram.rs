//! Telegram Bot API notification channel.
//!
//! Sends messages via `POST /bot<token>/sendMessage`. Approval requests carry
//! an inline keyboard with Approve / Deny buttons whose callback data is bound
//! to the event's session and phase; `wait_for_response` long-polls
//! `getUpdates` for a matching button press.
//!
//! Handles 429 rate limits by respecting the `parameters.retry_after` field
//! returned in the JSON response body.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
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

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Longest rendered title, in characters.
const TITLE_LIMIT: usize = 256;

const TRUNCATION_MARKER: &str = " [truncated]";

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// Telegram Bot API token.
    #[serde(default)]
    pub token: String,
    /// Target chat ID (user, group, or channel).
    #[serde(default)]
    pub chat_id: String,
    /// Long-poll timeout passed to `getUpdates`, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Bot API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout() -> u64 {
    25
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            events: Vec::new(),
            token: String::new(),
            chat_id: String::new(),
            poll_timeout_secs: default_poll_timeout(),
            api_base: default_api_base(),
        }
    }
}

/// Outcome of scanning one `getUpdates` batch.
#[derive(Debug, Default, PartialEq)]
struct UpdateScan {
    /// Offset to pass to the next `getUpdates` call.
    next_offset: Option<i64>,
    /// Matching decision and the callback query id to acknowledge.
    decision: Option<(bool, String)>,
}

/// Telegram notification channel.
pub struct TelegramChannel {
    name: String,
    config: TelegramConfig,
    supports_responses: bool,
    client: ManagedClient,
    /// Next `getUpdates` offset; updates below it have been consumed.
    next_update_id: AtomicI64,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    ///
    /// Without both a token and a chat id the channel cannot receive button
    /// presses and is created as notify-only.
    pub fn new(config: TelegramConfig) -> Self {
        let supports_responses = !config.token.is_empty() && !config.chat_id.is_empty();
        if !supports_responses {
            warn!("Telegram channel missing token or chat_id; approvals disabled");
        }

        // The HTTP timeout must outlast the long poll.
        let request_timeout = Duration::from_secs(config.poll_timeout_secs + 10);

        Self {
            name: config.name.clone().unwrap_or_else(|| "telegram".to_string()),
            supports_responses,
            client: ManagedClient::new(request_timeout),
            next_update_id: AtomicI64::new(0),
            config,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token,
            method
        )
    }

    fn severity_emoji(severity: EventSeverity) -> &'static str {
        match severity {
            EventSeverity::Info => "\u{2139}\u{fe0f}",     // ℹ️
            EventSeverity::Warning => "\u{26a0}\u{fe0f}",  // ⚠️
            EventSeverity::Error => "\u{274c}",            // ❌
            EventSeverity::Critical => "\u{1f6a8}",        // 🚨
        }
    }

    /// Build the HTML message text for an event.
    ///
    /// The summary is cut before markup is added, so the result never splits
    /// an entity or leaves a tag open.
    fn build_message(&self, event: &NotificationEvent) -> String {
        let emoji = Self::severity_emoji(event.severity());
        let head = format!(
            "{emoji} <b>{}</b>\n\n",
            escape_html_within(event.title(), TITLE_LIMIT)
        );
        let mut tail = String::new();
        if !event.phase().is_empty() {
            tail.push_str(&format!("\n\n<i>Phase:</i> {}", escape_html(event.phase())));
        }
        tail.push_str(&format!(
            "\n<i>Session:</i> <code>{}</code>",
            escape_html(event.session_id())
        ));

        let budget = TELEGRAM_MESSAGE_LIMIT
            .saturating_sub(head.chars().count())
            .saturating_sub(tail.chars().count());
        format!("{head}{}{tail}", escape_html_within(event.summary(), budget))
    }

    fn build_payload(&self, event: &NotificationEvent) -> Value {
        let mut payload = json!({
            "chat_id": self.config.chat_id,
            "text": self.build_message(event),
            "parse_mode": "HTML",
        });

        if event.requires_response() {
            let (approve, deny) = callback_data(event);
            payload["reply_markup"] = json!({
                "inline_keyboard": [[
                    {"text": "\u{2705} Approve", "callback_data": approve},
                    {"text": "\u{274c} Deny", "callback_data": deny},
                ]]
            });
        }

        payload
    }

    /// Send request with rate limit handling.
    async fn send_with_retry(&self, client: &Client, payload: &Value) -> Result<()> {
        let url = self.method_url("sendMessage");
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = client.post(&url).json(payload).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let body: Value = response.json().await.unwrap_or_default();

                let retry_after = body
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(|v| v.as_u64())
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Telegram rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::channel(
                        &self.name,
                        format!("rate limit exceeded after {} retries", MAX_RATE_LIMIT_RETRIES),
                    ));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::channel(
                &self.name,
                format!("sendMessage failed: {} - {}", status, body),
            ));
        }
    }

    async fn get_updates(&self, client: &Client, poll_timeout: u64) -> Result<Value> {
        let offset = self.next_update_id.load(Ordering::SeqCst);
        let response = client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", poll_timeout.to_string()),
                ("allowed_updates", r#"["callback_query"]"#.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::channel(
                &self.name,
                format!("getUpdates failed: {}", status),
            ));
        }

        Ok(response.json().await?)
    }

    async fn answer_callback(&self, client: &Client, callback_id: &str, text: &str) {
        let result = client
            .post(self.method_url("answerCallbackQuery"))
            .json(&json!({"callback_query_id": callback_id, "text": text}))
            .send()
            .await;
        if let Err(e) = result {
            debug!(channel = %self.name, error = %e, "Failed to answer callback query");
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_responses(&self) -> bool {
        self.supports_responses
    }

    /// Creates the client and skips updates that arrived before this session.
    async fn connect(&self) -> Result<()> {
        self.client.connect();
        if self.config.token.is_empty() {
            return Ok(());
        }

        let client = self.client.get();
        let result = client
            .get(self.method_url("getUpdates"))
            .query(&[("offset", "-1"), ("limit", "1")])
            .send()
            .await;

        match result {
            Ok(response) => {
                let body: Value = response.json().await.unwrap_or_default();
                if let Some(next) = scan_updates(&body, "", "").next_offset {
                    self.next_update_id.store(next, Ordering::SeqCst);
                }
            }
            Err(e) => debug!(channel = %self.name, error = %e, "Failed to flush Telegram updates"),
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect();
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        if self.config.token.is_empty() || self.config.chat_id.is_empty() {
            return Err(Error::channel(&self.name, "token or chat_id not configured"));
        }

        let payload = self.build_payload(event);
        self.send_with_retry(&self.client.get(), &payload).await?;

        debug!("Telegram notification sent: {}", event.event_type());
        Ok(())
    }

    async fn wait_for_response(&self, event: &NotificationEvent, timeout: Duration) -> Result<bool> {
        if !self.supports_responses {
            return Ok(true);
        }

        let client = self.client.get();
        let deadline = Instant::now() + timeout;
        let (approve, deny) = callback_data(event);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let poll_timeout = remaining.as_secs().min(self.config.poll_timeout_secs);
            if poll_timeout == 0 {
                tokio::time::sleep(remaining).await;
                break;
            }

            match self.get_updates(&client, poll_timeout).await {
                Ok(body) => {
                    let scan = scan_updates(&body, &approve, &deny);
                    if let Some(next) = scan.next_offset {
                        self.next_update_id.store(next, Ordering::SeqCst);
                    }
                    if let Some((approved, callback_id)) = scan.decision {
                        let text = if approved { "Approved" } else { "Denied" };
                        self.answer_callback(&client, &callback_id, text).await;
                        info!(channel = %self.name, phase = %event.phase(), approved, "Checkpoint answered");
                        return Ok(approved);
                    }
                }
                Err(e) => {
                    debug!(channel = %self.name, error = %e, "Telegram poll error");
                    tokio::time::sleep(POLL_ERROR_BACKOFF.min(remaining)).await;
                }
            }
        }

        info!(channel = %self.name, phase = %event.phase(), "Approval timed out, auto-approving");
        Ok(true)
    }
}

/// Callback data for the approve and deny buttons of `event`.
fn callback_data(event: &NotificationEvent) -> (String, String) {
    let key = event.approval_key();
    (format!("approve:{}", key), format!("deny:{}", key))
}

/// Scan a `getUpdates` response for a button press matching `approve` / `deny`.
///
/// Every update in the batch is consumed. Presses by bots are ignored.
fn scan_updates(body: &Value, approve: &str, deny: &str) -> UpdateScan {
    let mut scan = UpdateScan::default();

    if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        return scan;
    }
    let Some(updates) = body.get("result").and_then(Value::as_array) else {
        return scan;
    };

    for update in updates {
        if let Some(id) = update.get("update_id").and_then(Value::as_i64) {
            scan.next_offset = Some(scan.next_offset.map_or(id + 1, |n| n.max(id + 1)));
        }

        if scan.decision.is_some() {
            continue;
        }

        let Some(callback) = update.get("callback_query") else {
            continue;
        };
        let from_bot = callback
            .get("from")
            .and_then(|f| f.get("is_bot"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if from_bot {
            continue;
        }

        let data = callback.get("data").and_then(Value::as_str).unwrap_or("");
        let callback_id = callback
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        if !approve.is_empty() && data == approve {
            scan.decision = Some((true, callback_id));
        } else if !deny.is_empty() && data == deny {
            scan.decision = Some((false, callback_id));
        }
    }

    scan
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape `text` for HTML, keeping the result within `limit` characters.
///
/// Cuts on source characters, so every entity stays whole.
fn escape_html_within(text: &str, limit: usize) -> String {
    let escaped = escape_html(text);
    if escaped.chars().count() <= limit {
        return escaped;
    }

    let budget = limit.saturating_sub(TRUNCATION_MARKER.len());
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let piece = match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            _ => "",
        };
        let width = if piece.is_empty() { 1 } else { piece.len() };
        if used + width > budget {
            break;
        }
        if piece.is_empty() {
            out.push(c);
        } else {
            out.push_str(piece);
        }
        used += width;
    }
    if limit >= TRUNCATION_MARKER.len() {
        out.push_str(TRUNCATION_MARKER);
    }
    out
}
