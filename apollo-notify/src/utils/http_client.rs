use std::{sync::OnceLock, time::Duration};

use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, warn};

use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build a `reqwest::Client` with the given request timeout.
///
/// A zero timeout leaves reqwest's default (no timeout) in place.
pub fn build_client(request_timeout: Duration) -> Client {
    install_rustls_provider();

    let mut builder = Client::builder();
    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client, falling back to defaults");
        Client::new()
    })
}

/// An HTTP client whose lifetime follows a channel's `connect`/`disconnect`.
///
/// Before `connect` (or after `disconnect`) every call to [`ManagedClient::get`]
/// hands out a transient client, so sends still work on an unconnected channel.
#[derive(Debug)]
pub struct ManagedClient {
    timeout: Duration,
    inner: RwLock<Option<Client>>,
}

impl ManagedClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: RwLock::new(None),
        }
    }

    /// Create the shared client. Idempotent.
    pub fn connect(&self) {
        let mut inner = self.inner.write();
        if inner.is_none() {
            *inner = Some(build_client(self.timeout));
        }
    }

    /// Drop the shared client. Idempotent.
    pub fn disconnect(&self) {
        self.inner.write().take();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn get(&self) -> Client {
        if let Some(client) = self.inner.read().as_ref() {
            return client.clone();
        }
        build_client(self.timeout)
    }
}

/// POST a JSON payload and fail on any non-2xx status.
pub async fn post_json(
    client: &Client,
    channel: &str,
    url: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let response = client.post(url).json(payload).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::channel(channel, format!("HTTP {} - {}", status, body)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_client_lifecycle() {
        let client = ManagedClient::new(Duration::from_secs(5));
        assert!(!client.is_connected());

        client.connect();
        client.connect();
        assert!(client.is_connected());

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
    }
}
