//! Periodic liveness pings for a running session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventType, NotificationEvent};
use super::router::NotificationRouter;

/// Lifecycle of a [`HeartbeatMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Running,
    Stopped,
}

/// Status fields reported in every heartbeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatStatus {
    pub current_phase: String,
    pub datasets_acquired: u64,
    pub cost_usd: f64,
}

struct Shared {
    router: Arc<NotificationRouter>,
    session_id: String,
    started_at: Instant,
    status: Mutex<HeartbeatStatus>,
}

impl Shared {
    fn build_event(&self) -> NotificationEvent {
        let status = self.status.lock().clone();
        let elapsed = self.started_at.elapsed().as_secs();

        let mut parts = vec![format!("Running for {}m", elapsed / 60)];
        if !status.current_phase.is_empty() {
            parts.push(format!("phase: {}", status.current_phase));
        }
        if status.cost_usd > 0.0 {
            parts.push(format!("cost: ${:.2}", status.cost_usd));
        }
        if status.datasets_acquired > 0 {
            parts.push(format!("datasets: {}", status.datasets_acquired));
        }

        NotificationEvent::new(
            EventType::Heartbeat,
            self.session_id.clone(),
            "Heartbeat",
            parts.join(" | "),
        )
        .with_phase(status.current_phase.clone())
        .with_detail("elapsed_seconds", elapsed)
        .with_detail("current_phase", status.current_phase)
        .with_detail("cost_usd", json!(status.cost_usd))
        .with_detail("datasets_acquired", status.datasets_acquired)
    }
}

/// Sends a heartbeat event through the router every `interval`.
pub struct HeartbeatMonitor {
    shared: Arc<Shared>,
    interval: Duration,
    state: HeartbeatState,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl HeartbeatMonitor {
    /// A zero `interval` disables the monitor.
    pub fn new(router: Arc<NotificationRouter>, session_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                router,
                session_id: session_id.into(),
                started_at: Instant::now(),
                status: Mutex::new(HeartbeatStatus::default()),
            }),
            interval,
            state: HeartbeatState::Idle,
            task: None,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn status(&self) -> HeartbeatStatus {
        self.shared.status.lock().clone()
    }

    /// Update the fields reported by the next heartbeat.
    ///
    /// An empty `phase` keeps the current one.
    pub fn update_status(&self, phase: &str, datasets_acquired: u64, cost_usd: f64) {
        let mut status = self.shared.status.lock();
        if !phase.is_empty() {
            status.current_phase = phase.to_string();
        }
        status.datasets_acquired = datasets_acquired;
        status.cost_usd = cost_usd;
    }

    /// Start the background loop.
    pub fn start(&mut self) {
        if self.state != HeartbeatState::Idle {
            warn!(session_id = %self.shared.session_id, state = ?self.state, "Heartbeat already started");
            return;
        }
        if self.interval.is_zero() {
            debug!(session_id = %self.shared.session_id, "Heartbeat disabled");
            return;
        }

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let event = shared.build_event();
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = shared.router.dispatch(&event) => {}
                }
            }
            debug!(session_id = %shared.session_id, "Heartbeat loop exited");
        });

        info!(session_id = %self.shared.session_id, interval_secs = interval.as_secs(), "Heartbeat started");
        self.task = Some((token, handle));
        self.state = HeartbeatState::Running;
    }

    /// Stop the loop and wait for it to exit. No-op unless running.
    pub async fn stop(&mut self) {
        let Some((token, handle)) = self.task.take() else {
            return;
        };

        token.cancel();
        if let Err(e) = handle.await {
            warn!(session_id = %self.shared.session_id, error = %e, "Heartbeat task ended abnormally");
        }
        self.state = HeartbeatState::Stopped;
        debug!(session_id = %self.shared.session_id, "Heartbeat stopped");
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some((token, _)) = self.task.take() {
            token.cancel();
        }
    }
}
