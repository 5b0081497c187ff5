//! Email notification channel using SMTP.
//!
//! Events are batched: ordinary events wait in a pending queue until the
//! current interval window closes, then go out together as one message.
//! Terminal and critical events flush the queue immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::{EventSeverity, NotificationEvent};
use crate::{Error, Result};

const SUBJECT_PREFIX: &str = "[ApolloBot]";

/// Email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// SMTP server host.
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username. Empty disables authentication.
    #[serde(default)]
    pub username: String,
    /// SMTP password.
    #[serde(default)]
    pub password: String,
    /// Sender email address.
    #[serde(default)]
    pub from_addr: String,
    /// Recipient email addresses.
    #[serde(default)]
    pub to_addrs: Vec<String>,
    /// Use STARTTLS.
    #[serde(default = "default_true")]
    pub use_tls: bool,
    /// Minimum seconds between two batched messages.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_min_interval() -> u64 {
    60
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            events: Vec::new(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_addr: String::new(),
            to_addrs: Vec::new(),
            use_tls: true,
            min_interval_secs: default_min_interval(),
        }
    }
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub plain: String,
    pub html: String,
}

/// Delivery backend for [`EmailChannel`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<()>;
}

/// SMTP delivery through `lettre`.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| Error::Email(format!("SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        builder = builder.port(config.smtp_port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<()> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| Error::Email(format!("Invalid from: {e}")))?;

        let mut builder = Message::builder().from(from).subject(&mail.subject);
        for to in &mail.to {
            let to: Mailbox = to
                .parse()
                .map_err(|e| Error::Email(format!("Invalid to: {e}")))?;
            builder = builder.to(to);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                mail.plain.clone(),
                mail.html.clone(),
            ))
            .map_err(|e| Error::Email(format!("Build email: {e}")))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| Error::Email(format!("SMTP send: {e}")))?;
        Ok(())
    }
}

struct BatchState {
    pending: Vec<NotificationEvent>,
    window_start: Instant,
    deferred: Option<JoinHandle<()>>,
}

struct EmailInner {
    name: String,
    config: EmailConfig,
    interval: Duration,
    transport: Box<dyn MailTransport>,
    state: Mutex<BatchState>,
}

/// Email notification channel.
pub struct EmailChannel {
    inner: Arc<EmailInner>,
}

impl EmailChannel {
    /// Create an email channel delivering over SMTP.
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = SmtpTransport::new(&config)?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Create an email channel with a custom delivery backend.
    pub fn with_transport(config: EmailConfig, transport: Box<dyn MailTransport>) -> Self {
        Self {
            inner: Arc::new(EmailInner {
                name: config.name.clone().unwrap_or_else(|| "email".to_string()),
                interval: Duration::from_secs(config.min_interval_secs),
                state: Mutex::new(BatchState {
                    pending: Vec::new(),
                    window_start: Instant::now(),
                    deferred: None,
                }),
                transport,
                config,
            }),
        }
    }

    /// Number of events waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Spawn the timer that flushes the queue when the window closes.
    fn schedule_flush(&self, state: &mut BatchState) {
        if state.deferred.is_some() {
            return;
        }
        let at = state.window_start + self.inner.interval;
        let inner = Arc::clone(&self.inner);
        state.deferred = Some(tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let batch = inner.take_batch(false);
            if let Err(e) = inner.deliver(batch).await {
                warn!(channel = %inner.name, error = %e, "Deferred email flush failed");
            }
        }));
    }
}

impl EmailInner {
    /// Drain the queue and open a new window.
    ///
    /// `cancel_timer` aborts a pending deferred flush; the deferred task itself
    /// passes `false` so it does not abort its own delivery.
    fn take_batch(&self, cancel_timer: bool) -> Vec<NotificationEvent> {
        let mut state = self.state.lock();
        if let Some(handle) = state.deferred.take()
            && cancel_timer
        {
            handle.abort();
        }
        state.window_start = Instant::now();
        std::mem::take(&mut state.pending)
    }

    async fn deliver(&self, events: Vec<NotificationEvent>) -> Result<()> {
        let Some(mail) = self.render(&events) else {
            return Ok(());
        };
        if mail.to.is_empty() {
            return Err(Error::Email("no recipients configured".to_string()));
        }

        self.transport.deliver(&mail).await?;
        debug!(channel = %self.name, events = events.len(), "Email sent: {}", mail.subject);
        Ok(())
    }

    fn render(&self, events: &[NotificationEvent]) -> Option<OutgoingMail> {
        let newest = events.last()?;

        let mut subject = format!("{} {}", SUBJECT_PREFIX, newest.title());
        if events.len() > 1 {
            subject.push_str(&format!(" (+{} more)", events.len() - 1));
        }

        Some(OutgoingMail {
            subject,
            from: self.config.from_addr.clone(),
            to: self.config.to_addrs.clone(),
            plain: build_plain(events),
            html: build_html(events),
        })
    }
}

fn severity_color(severity: EventSeverity) -> &'static str {
    match severity {
        EventSeverity::Info => "#3498db",
        EventSeverity::Warning => "#f39c12",
        EventSeverity::Error => "#e74c3c",
        EventSeverity::Critical => "#8e44ad",
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn build_html(events: &[NotificationEvent]) -> String {
    let rows: String = events
        .iter()
        .map(|event| {
            let phase = if event.phase().is_empty() {
                String::new()
            } else {
                format!("<br/><em>Phase: {}</em>", escape_html(event.phase()))
            };
            format!(
                r#"<tr><td style="border-left: 4px solid {}; padding: 8px;"><strong>{}</strong><br/>{}{}</td></tr>"#,
                severity_color(event.severity()),
                escape_html(event.title()),
                escape_html(event.summary()),
                phase
            )
        })
        .collect();

    let session = events.first().map(|e| e.session_id()).unwrap_or_default();

    format!(
        r#"<html><body><table style="font-family: sans-serif; border-collapse: collapse; width: 100%;">{}</table><p style="color: #999; font-size: 12px;">Session: {}</p></body></html>"#,
        rows,
        escape_html(session)
    )
}

fn build_plain(events: &[NotificationEvent]) -> String {
    let mut lines = Vec::new();
    for event in events {
        lines.push(format!(
            "[{}] {}",
            event.severity().to_string().to_uppercase(),
            event.title()
        ));
        lines.push(format!("  {}", event.summary()));
        if !event.phase().is_empty() {
            lines.push(format!("  Phase: {}", event.phase()));
        }
        lines.push(String::new());
    }
    let session = events.first().map(|e| e.session_id()).unwrap_or_default();
    lines.push(format!("Session: {}", session));
    lines.join("\n")
}

impl Drop for EmailChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.state.lock().deferred.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.inner.name
    }

    /// Flushes anything still queued.
    async fn disconnect(&self) -> Result<()> {
        let batch = self.inner.take_batch(true);
        self.inner.deliver(batch).await
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            state.pending.push(event.clone());

            let window_closed = state.window_start.elapsed() >= self.inner.interval;
            if !event.is_urgent() && !window_closed {
                self.schedule_flush(&mut state);
                return Ok(());
            }
        }

        let batch = self.inner.take_batch(true);
        self.inner.deliver(batch).await
    }
}
