//! In-memory channel with scripted behavior.
//!
//! Records every delivered event and answers approvals with a fixed decision
//! after an optional delay. Useful for integrators wiring the router into
//! their own pipelines and for exercising the approval race.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::NotificationChannel;
use crate::notification::events::NotificationEvent;
use crate::{Error, Result};

#[derive(Default)]
struct MockState {
    sent: Mutex<Vec<NotificationEvent>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    waits: AtomicUsize,
    cancelled: AtomicBool,
}

/// A scripted notification channel.
///
/// Clones share their recorded state, so a test can keep a handle after
/// boxing the channel into a router.
#[derive(Clone)]
pub struct MockChannel {
    name: String,
    supports_responses: bool,
    response: bool,
    delay: Duration,
    fail_send: bool,
    fail_wait: bool,
    state: Arc<MockState>,
}

impl MockChannel {
    /// A notify-only mock.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supports_responses: false,
            response: true,
            delay: Duration::ZERO,
            fail_send: false,
            fail_wait: false,
            state: Arc::default(),
        }
    }

    /// A bidirectional mock answering `response` after `delay`.
    pub fn responder(name: impl Into<String>, response: bool, delay: Duration) -> Self {
        Self {
            supports_responses: true,
            response,
            delay,
            ..Self::new(name)
        }
    }

    /// Make every `send` fail.
    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Make `wait_for_response` fail after its delay.
    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    /// Events delivered through `send`, in order.
    pub fn sent(&self) -> Vec<NotificationEvent> {
        self.state.sent.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Number of `wait_for_response` calls started.
    pub fn wait_count(&self) -> usize {
        self.state.waits.load(Ordering::SeqCst)
    }

    /// Whether a `wait_for_response` call was dropped before finishing.
    pub fn was_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// Flags the wait as cancelled unless disarmed.
struct CancelGuard<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_responses(&self) -> bool {
        self.supports_responses
    }

    async fn connect(&self) -> Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        if self.fail_send {
            return Err(Error::channel(&self.name, "scripted send failure"));
        }
        self.state.sent.lock().push(event.clone());
        Ok(())
    }

    async fn wait_for_response(&self, _event: &NotificationEvent, timeout: Duration) -> Result<bool> {
        if !self.supports_responses {
            return Ok(true);
        }
        self.state.waits.fetch_add(1, Ordering::SeqCst);

        let mut guard = CancelGuard {
            flag: &self.state.cancelled,
            armed: true,
        };

        let answered = self.delay <= timeout;
        tokio::time::sleep(self.delay.min(timeout)).await;
        guard.armed = false;

        if self.fail_wait {
            return Err(Error::channel(&self.name, "scripted wait failure"));
        }
        // Timeout without an answer approves.
        Ok(if answered { self.response } else { true })
    }
}
