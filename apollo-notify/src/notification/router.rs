//! Event fan-out and approval resolution.
//!
//! The [`NotificationRouter`] owns every registered channel together with its
//! event filter. `dispatch` delivers an event to all matching channels at
//! once; `request_approval` races the bidirectional channels and takes the
//! first decision.
//!
//! No channel failure ever escapes the router: each per-channel call goes
//! through a guard that logs the error and moves on. When the approval
//! machinery cannot produce an answer the router approves.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::channels::{DEFAULT_RESPONSE_TIMEOUT, NotificationChannel};
use super::events::{EventType, NotificationEvent, canonicalize_event_name};
use crate::Result;

/// Slack the router gives channels beyond their own response timeout.
const APPROVAL_GRACE: Duration = Duration::from_secs(30);

/// Event types a channel is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Every event.
    #[default]
    All,
    /// Only the listed event types.
    Only(HashSet<EventType>),
}

impl EventFilter {
    /// Build a filter from configured names.
    ///
    /// An empty list or one containing `"*"` subscribes to everything.
    /// Unknown names are logged and dropped.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.is_empty() || names.iter().any(|n| n.as_ref().trim() == "*") {
            return Self::All;
        }

        let mut types = HashSet::new();
        for name in names {
            match canonicalize_event_name(name.as_ref()) {
                Some(event_type) => {
                    types.insert(event_type);
                }
                None => warn!(event = %name.as_ref(), "Ignoring unknown event type in filter"),
            }
        }
        Self::Only(types)
    }

    /// Filter accepting exactly the given event types.
    pub fn only(types: impl IntoIterator<Item = EventType>) -> Self {
        Self::Only(types.into_iter().collect())
    }

    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(&event_type),
        }
    }
}

struct Registration {
    channel: Arc<dyn NotificationChannel>,
    filter: EventFilter,
}

/// Dispatches events to registered channels with filtering.
pub struct NotificationRouter {
    registrations: Vec<Registration>,
    default_timeout: Duration,
    /// Notify-only sends started by `request_approval`.
    background: Mutex<JoinSet<()>>,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            default_timeout: DEFAULT_RESPONSE_TIMEOUT,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Set how long `request_approval` lets each channel wait for a human.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a channel. Channels sharing a name stay separate targets.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>, filter: EventFilter) {
        debug!(channel = %channel.name(), ?filter, "Registered notification channel");
        self.registrations.push(Registration { channel, filter });
    }

    pub fn channel_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Channel names in registration order.
    pub fn channel_names(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.channel.name()).collect()
    }

    fn matching<'a>(
        &'a self,
        event: &'a NotificationEvent,
    ) -> impl Iterator<Item = &'a Arc<dyn NotificationChannel>> + 'a {
        self.registrations
            .iter()
            .filter(move |r| r.filter.matches(event.event_type()))
            .map(|r| &r.channel)
    }

    /// Send `event` to every matching channel concurrently.
    ///
    /// Returns once all sends have settled. Failures are logged.
    pub async fn dispatch(&self, event: &NotificationEvent) {
        let sends: Vec<_> = self
            .matching(event)
            .map(|channel| guarded_send(channel.as_ref(), event))
            .collect();

        if sends.is_empty() {
            debug!(event_type = %event.event_type(), "No channel subscribed to event");
            return;
        }

        join_all(sends).await;
    }

    /// Ask the bidirectional channels for a decision on `event`.
    ///
    /// Notify-only channels receive the event in the background; see
    /// [`drain`](Self::drain). The first
    /// bidirectional channel to answer wins and the remaining waits are
    /// aborted. Errors, panics and missing responders all resolve to `true`.
    pub async fn request_approval(&self, event: &NotificationEvent) -> bool {
        let (bidirectional, notify_only): (Vec<_>, Vec<_>) = self
            .matching(event)
            .cloned()
            .partition(|channel| channel.supports_responses());

        {
            let mut background = self.background.lock();
            while background.try_join_next().is_some() {}
            for channel in notify_only {
                let event = event.clone();
                background.spawn(async move {
                    guarded_send(channel.as_ref(), &event).await;
                });
            }
        }

        if bidirectional.is_empty() {
            info!(phase = %event.phase(), "No interactive channel, auto-approving");
            return true;
        }

        join_all(
            bidirectional
                .iter()
                .map(|channel| guarded_send(channel.as_ref(), event)),
        )
        .await;

        let mut waits = JoinSet::new();
        for channel in bidirectional {
            let event = event.clone();
            let timeout = self.default_timeout;
            waits.spawn(async move {
                let name = channel.name().to_string();
                let result = channel.wait_for_response(&event, timeout).await;
                (name, result)
            });
        }

        let first = tokio::time::timeout(self.default_timeout + APPROVAL_GRACE, waits.join_next()).await;
        waits.abort_all();

        match first {
            Ok(Some(Ok((channel, Ok(approved))))) => {
                info!(channel = %channel, phase = %event.phase(), approved, "Approval resolved");
                approved
            }
            Ok(Some(Ok((channel, Err(e))))) => {
                warn!(channel = %channel, error = %e, "Approval wait failed, auto-approving");
                true
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "Approval task aborted, auto-approving");
                true
            }
            Ok(None) => true,
            Err(_) => {
                warn!(phase = %event.phase(), "No approval decision in time, auto-approving");
                true
            }
        }
    }

    /// Connect every channel. One failure does not stop the others.
    pub async fn connect_all(&self) {
        join_all(self.registrations.iter().map(|r| async move {
            if let Err(e) = r.channel.connect().await {
                warn!(channel = %r.channel.name(), error = %e, "Failed to connect channel");
            }
        }))
        .await;
    }

    /// Wait for notify-only sends still running from `request_approval`.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.background.lock());
        if !pending.is_empty() {
            debug!(count = pending.len(), "Waiting for background notifications");
        }
        while pending.join_next().await.is_some() {}
    }

    /// Disconnect every channel after draining background sends.
    /// One failure does not stop the others.
    pub async fn disconnect_all(&self) {
        self.drain().await;
        join_all(self.registrations.iter().map(|r| async move {
            if let Err(e) = r.channel.disconnect().await {
                warn!(channel = %r.channel.name(), error = %e, "Failed to disconnect channel");
            }
        }))
        .await;
    }

    /// Run every channel's self-test and report the outcome per channel.
    pub async fn test_all(&self) -> Vec<(String, Result<()>)> {
        join_all(self.registrations.iter().map(|r| async move {
            (r.channel.name().to_string(), r.channel.test().await)
        }))
        .await
    }
}

async fn guarded_send(channel: &dyn NotificationChannel, event: &NotificationEvent) {
    match channel.send(event).await {
        Ok(()) => debug!(channel = %channel.name(), event_type = %event.event_type(), "Notification delivered"),
        Err(e) => warn!(
            channel = %channel.name(),
            event_type = %event.event_type(),
            error = %e,
            "Failed to send notification"
        ),
    }
}
