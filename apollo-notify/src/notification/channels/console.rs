//! Console notification channel.
//!
//! Writes events to the local terminal. This is the default channel when no
//! external transport is configured.

use std::io::Write;

use async_trait::async_trait;
use colored::Colorize;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::NotificationChannel;
use crate::Result;
use crate::notification::events::{EventSeverity, EventType, NotificationEvent};

/// Console channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type filter (empty or `"*"` = everything).
    #[serde(default)]
    pub events: Vec<String>,
    /// Emit ANSI colors.
    #[serde(default = "default_true")]
    pub colored: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            events: Vec::new(),
            colored: true,
        }
    }
}

fn event_emoji(event_type: EventType) -> &'static str {
    match event_type {
        EventType::SessionStarted => "\u{1f52c}",        // 🔬
        EventType::PhaseStarted => "\u{25b6}\u{fe0f}",   // ▶️
        EventType::PhaseCompleted => "\u{2705}",         // ✅
        EventType::PhaseFailed => "\u{274c}",            // ❌
        EventType::CheckpointApproval => "\u{26a0}\u{fe0f}", // ⚠️
        EventType::Finding => "\u{1f4a1}",               // 💡
        EventType::BudgetWarning => "\u{1f4b0}",         // 💰
        EventType::SessionCompleted => "\u{1f389}",      // 🎉
        EventType::SessionFailed => "\u{1f6a8}",         // 🚨
        EventType::Heartbeat => "\u{1f493}",             // 💓
    }
}

/// Console notification channel.
pub struct ConsoleChannel {
    name: String,
    colored: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleChannel {
    /// Create a console channel writing to stdout.
    pub fn new(config: ConsoleConfig) -> Self {
        Self::with_writer(config, Box::new(std::io::stdout()))
    }

    /// Create a console channel writing to an arbitrary sink.
    pub fn with_writer(config: ConsoleConfig, out: Box<dyn Write + Send>) -> Self {
        Self {
            name: config.name.unwrap_or_else(|| "console".to_string()),
            colored: config.colored,
            out: Mutex::new(out),
        }
    }

    /// Render an event to the text written to the terminal.
    fn render(&self, event: &NotificationEvent) -> String {
        let emoji = event_emoji(event.event_type());

        if event.event_type() == EventType::Heartbeat {
            let line = format!("{} {}", emoji, event.summary());
            return format!("{}\n", self.muted(&line));
        }

        match event.severity() {
            EventSeverity::Error | EventSeverity::Critical => self.render_panel(emoji, event),
            severity => {
                let heading = format!("{} {}", emoji, event.title());
                let mut out = format!("\n{}\n", self.styled(&heading, severity));
                if !event.summary().is_empty() {
                    out.push_str(&format!("  {}\n", event.summary()));
                }
                out
            }
        }
    }

    /// Boxed rendering used for error and critical events.
    fn render_panel(&self, emoji: &str, event: &NotificationEvent) -> String {
        let heading = format!(" {} {} ", emoji, event.title());
        let body: Vec<&str> = if event.summary().is_empty() {
            Vec::new()
        } else {
            event.summary().lines().collect()
        };

        let width = body
            .iter()
            .map(|l| l.chars().count() + 2)
            .chain(std::iter::once(heading.chars().count()))
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let top = format!("╭{}{}╮", heading, "─".repeat(width - heading.chars().count()));
        out.push_str(&self.styled(&top, event.severity()));
        out.push('\n');
        for line in body {
            let pad = width - line.chars().count() - 1;
            out.push_str(&self.styled("│", event.severity()));
            out.push_str(&format!(" {}{}", line, " ".repeat(pad)));
            out.push_str(&self.styled("│", event.severity()));
            out.push('\n');
        }
        let bottom = format!("╰{}╯", "─".repeat(width));
        out.push_str(&self.styled(&bottom, event.severity()));
        out.push('\n');
        out
    }

    fn styled(&self, text: &str, severity: EventSeverity) -> String {
        if !self.colored {
            return text.to_string();
        }
        match severity {
            EventSeverity::Info => text.blue().bold().to_string(),
            EventSeverity::Warning => text.yellow().bold().to_string(),
            EventSeverity::Error => text.red().to_string(),
            EventSeverity::Critical => text.red().bold().to_string(),
        }
    }

    fn muted(&self, text: &str) -> String {
        if self.colored {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let text = self.render(event);
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn plain_channel() -> (ConsoleChannel, SharedBuf) {
        let buf = SharedBuf::default();
        let config = ConsoleConfig {
            colored: false,
            ..Default::default()
        };
        (ConsoleChannel::with_writer(config, Box::new(buf.clone())), buf)
    }

    #[test]
    fn test_console_config_default() {
        let config = ConsoleConfig::default();
        assert!(config.enabled);
        assert!(config.colored);
        assert!(config.events.is_empty());
    }

    #[tokio::test]
    async fn test_send_info_event() {
        let (channel, buf) = plain_channel();
        let event =
            NotificationEvent::new(EventType::PhaseCompleted, "s1", "Phase complete: plan", "3 steps");

        channel.send(&event).await.unwrap();

        let out = buf.contents();
        assert!(out.contains("Phase complete: plan"));
        assert!(out.contains("  3 steps"));
        assert!(!out.contains('╭'));
        assert!(!channel.supports_responses());
    }

    #[tokio::test]
    async fn test_heartbeat_is_single_line() {
        let (channel, buf) = plain_channel();
        let event = NotificationEvent::new(EventType::Heartbeat, "s1", "Heartbeat", "Running for 5m");

        channel.send(&event).await.unwrap();

        let out = buf.contents();
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("Running for 5m"));
        assert!(!out.contains("Heartbeat"));
    }

    #[tokio::test]
    async fn test_error_event_is_framed() {
        let (channel, buf) = plain_channel();
        let event = NotificationEvent::new(EventType::PhaseFailed, "s1", "Analysis failed", "boom")
            .with_severity(EventSeverity::Critical);

        channel.send(&event).await.unwrap();

        let out = buf.contents();
        assert!(out.starts_with('╭'));
        assert!(out.contains("Analysis failed"));
        assert!(out.contains("│ boom"));
        assert!(out.trim_end().ends_with('╯'));
    }

    #[test]
    fn test_colored_heartbeat_is_dimmed() {
        colored::control::set_override(true);
        let channel = ConsoleChannel::with_writer(ConsoleConfig::default(), Box::new(std::io::sink()));
        let event = NotificationEvent::new(EventType::Heartbeat, "s1", "Heartbeat", "alive");
        let rendered = channel.render(&event);
        assert!(rendered.contains("\u{1b}[2m"));
    }
}
