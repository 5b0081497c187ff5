//! Notification events.
//!
//! Defines the event types, severity levels and the immutable event value
//! that every channel consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Static metadata about a supported notification event type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventTypeInfo {
    /// The event type itself.
    pub event_type: EventType,
    /// Human-friendly label.
    pub label: &'static str,
    /// Additional accepted filter keys.
    pub aliases: &'static [&'static str],
}

const EVENT_TYPES: &[EventTypeInfo] = &[
    EventTypeInfo {
        event_type: EventType::SessionStarted,
        label: "Session Started",
        aliases: &["session.started", "SessionStarted"],
    },
    EventTypeInfo {
        event_type: EventType::PhaseStarted,
        label: "Phase Started",
        aliases: &["phase.started", "PhaseStarted"],
    },
    EventTypeInfo {
        event_type: EventType::PhaseCompleted,
        label: "Phase Completed",
        aliases: &["phase.complete", "phase.completed", "PhaseCompleted"],
    },
    EventTypeInfo {
        event_type: EventType::PhaseFailed,
        label: "Phase Failed",
        aliases: &["phase.failed", "PhaseFailed"],
    },
    EventTypeInfo {
        event_type: EventType::CheckpointApproval,
        label: "Checkpoint Approval",
        aliases: &["checkpoint", "approval", "checkpoint.approval"],
    },
    EventTypeInfo {
        event_type: EventType::Finding,
        label: "Finding",
        aliases: &["findings"],
    },
    EventTypeInfo {
        event_type: EventType::BudgetWarning,
        label: "Budget Warning",
        aliases: &["budget", "budget.warning"],
    },
    EventTypeInfo {
        event_type: EventType::SessionCompleted,
        label: "Session Completed",
        aliases: &["session.complete", "session.completed"],
    },
    EventTypeInfo {
        event_type: EventType::SessionFailed,
        label: "Session Failed",
        aliases: &["session.failed"],
    },
    EventTypeInfo {
        event_type: EventType::Heartbeat,
        label: "Heartbeat",
        aliases: &["ping"],
    },
];

pub fn event_types() -> &'static [EventTypeInfo] {
    EVENT_TYPES
}

/// Resolve a filter name from configuration to an event type.
///
/// Matching ignores case and the separators `.`, `-`, `_` and spaces, and
/// also accepts the aliases listed in [`event_types`].
pub fn canonicalize_event_name(input: &str) -> Option<EventType> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized_input = normalize_key(trimmed);
    for info in EVENT_TYPES {
        if normalize_key(info.event_type.as_str()) == normalized_input {
            return Some(info.event_type);
        }
        if info
            .aliases
            .iter()
            .any(|alias| normalize_key(alias) == normalized_input)
        {
            return Some(info.event_type);
        }
    }

    None
}

fn normalize_key(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | '.' | '-' | ' '))
        .collect()
}

/// Kind of occurrence an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    CheckpointApproval,
    Finding,
    BudgetWarning,
    SessionCompleted,
    SessionFailed,
    Heartbeat,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::PhaseFailed => "phase_failed",
            Self::CheckpointApproval => "checkpoint_approval",
            Self::Finding => "finding",
            Self::BudgetWarning => "budget_warning",
            Self::SessionCompleted => "session_completed",
            Self::SessionFailed => "session_failed",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Whether this event ends a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionCompleted | Self::SessionFailed)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity level for notifications.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// Informational.
    #[default]
    Info,
    /// Something needs attention soon.
    Warning,
    /// A step failed.
    Error,
    /// Requires immediate attention.
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A single notification occurrence.
///
/// Built once through [`NotificationEvent::new`] and the `with_*` methods and
/// never changed afterwards; channels only get shared references to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    event_type: EventType,
    #[serde(default)]
    severity: EventSeverity,
    session_id: String,
    #[serde(default)]
    phase: String,
    title: String,
    summary: String,
    #[serde(default)]
    details: Map<String, Value>,
    #[serde(default)]
    requires_response: bool,
    timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        event_type: EventType,
        session_id: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity: EventSeverity::Info,
            session_id: session_id.into(),
            phase: String::new(),
            title: title.into(),
            summary: summary.into(),
            details: Map::new(),
            requires_response: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Mark the event as needing a human approve/deny decision.
    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn severity(&self) -> EventSeverity {
        self.severity
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    pub fn requires_response(&self) -> bool {
        self.requires_response
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// ISO-8601 UTC rendering of the creation time.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339()
    }

    /// Key binding an approval prompt to this event's session and phase.
    pub fn approval_key(&self) -> String {
        format!("{}:{}", self.session_id, self.phase)
    }

    /// Whether a channel should deliver this event without batching.
    pub fn is_urgent(&self) -> bool {
        self.event_type.is_terminal() || self.severity == EventSeverity::Critical
    }

    /// Synthetic event used by channel self-tests.
    pub fn test_event() -> Self {
        Self::new(
            EventType::SessionStarted,
            "apollo-notify-test",
            "Test notification",
            "If you can read this, the channel is configured correctly.",
        )
    }
}
