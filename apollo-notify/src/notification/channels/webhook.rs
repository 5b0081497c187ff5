//! Generic webhook notification channel.
//!
//! POSTs the full event as JSON. When a shared secret is configured the raw
//! body is signed with HMAC-SHA256 and the signature is sent in
//! [`SIGNATURE_HEADER`] as `sha256=<hex>`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::NotificationEvent;
use crate::utils::http_client::ManagedClient;
use crate::{Error, Result};

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Apollo-Signature";

// `HeaderName::from_static` only accepts the lowercase form.
const SIGNATURE_HEADER_NAME: HeaderName = HeaderName::from_static("x-apollo-signature");

type HmacSha256 = Hmac<Sha256>;

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// Webhook URL.
    #[serde(default)]
    pub url: String,
    /// Shared secret for the HMAC signature. Empty disables signing.
    #[serde(default)]
    pub secret: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            events: Vec::new(),
            url: String::new(),
            secret: String::new(),
            headers: BTreeMap::new(),
            auth: None,
            timeout_secs: 30,
        }
    }
}

/// Generic webhook notification channel.
pub struct WebhookChannel {
    name: String,
    config: WebhookConfig,
    client: ManagedClient,
}

impl WebhookChannel {
    /// Create a new Webhook channel.
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            name: config.name.clone().unwrap_or_else(|| "webhook".to_string()),
            client: ManagedClient::new(Duration::from_secs(config.timeout_secs)),
            config,
        }
    }

    /// Serialize the event into the exact bytes that are posted and signed.
    fn build_body(&self, event: &NotificationEvent) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }

    /// Compute `sha256=<hex>` over `body`, if a secret is configured.
    fn sign(&self, body: &[u8]) -> Result<Option<String>> {
        if self.config.secret.is_empty() {
            return Ok(None);
        }

        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| Error::channel(&self.name, format!("invalid HMAC key: {}", e)))?;
        mac.update(body);
        Ok(Some(format!(
            "sha256={}",
            hex::encode(mac.finalize().into_bytes())
        )))
    }

    /// Build the request headers for a given body.
    fn build_headers(&self, body: &[u8]) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &self.config.headers {
            match (
                name.parse::<HeaderName>(),
                value.parse::<HeaderValue>(),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(channel = %self.name, header = %name, "Skipping invalid webhook header"),
            }
        }

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {}", token).parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
                {
                    headers.insert(name, value);
                }
            }
            // Basic auth is applied on the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        if let Some(signature) = self.sign(body)? {
            let value = HeaderValue::from_str(&signature)
                .map_err(|e| Error::channel(&self.name, e.to_string()))?;
            headers.insert(SIGNATURE_HEADER_NAME, value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
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
        if self.config.url.is_empty() {
            return Err(Error::channel(&self.name, "no webhook url configured"));
        }

        let body = self.build_body(event)?;
        let headers = self.build_headers(&body)?;

        let mut request = self
            .client
            .get()
            .post(&self.config.url)
            .headers(headers)
            .body(body);

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::channel(
                &self.name,
                format!("HTTP {} - {}", status, body),
            ));
        }

        debug!(channel = %self.name, "Webhook notification sent: {}", event.event_type());
        Ok(())
    }
}
