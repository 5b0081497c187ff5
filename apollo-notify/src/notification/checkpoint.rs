//! Checkpoint handlers called by phase runners between pipeline phases.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::events::{EventSeverity, EventType, NotificationEvent};
use super::router::NotificationRouter;

/// Interface phase runners use to report progress and ask for approval.
///
/// The defaults approve everything and drop notifications.
#[async_trait]
pub trait CheckpointHandler: Send + Sync {
    /// Ask whether the pipeline may continue past `phase`.
    async fn request_approval(&self, _phase: &str, _summary: &str) -> bool {
        true
    }

    /// Report that `phase` finished.
    async fn notify(&self, _phase: &str, _summary: &str) {}
}

/// Handler for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApproveCheckpoint;

impl CheckpointHandler for AutoApproveCheckpoint {}

/// Routes checkpoints through a [`NotificationRouter`].
pub struct ChannelCheckpointHandler {
    router: Arc<NotificationRouter>,
    session_id: RwLock<String>,
}

impl ChannelCheckpointHandler {
    pub fn new(router: Arc<NotificationRouter>, session_id: impl Into<String>) -> Self {
        Self {
            router,
            session_id: RwLock::new(session_id.into()),
        }
    }

    /// Rebind to a new session. Later events carry `session_id`.
    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.write() = session_id.into();
    }

    pub fn session_id(&self) -> String {
        self.session_id.read().clone()
    }

    fn approval_event(&self, phase: &str, summary: &str) -> NotificationEvent {
        NotificationEvent::new(
            EventType::CheckpointApproval,
            self.session_id(),
            format!("Approval needed: {}", phase),
            summary,
        )
        .with_severity(EventSeverity::Warning)
        .with_phase(phase)
        .requiring_response()
    }

    fn phase_event(&self, phase: &str, summary: &str) -> NotificationEvent {
        NotificationEvent::new(
            EventType::PhaseCompleted,
            self.session_id(),
            format!("Phase complete: {}", phase),
            summary,
        )
        .with_phase(phase)
    }
}

#[async_trait]
impl CheckpointHandler for ChannelCheckpointHandler {
    async fn request_approval(&self, phase: &str, summary: &str) -> bool {
        let event = self.approval_event(phase, summary);
        self.router.request_approval(&event).await
    }

    async fn notify(&self, phase: &str, summary: &str) {
        let event = self.phase_event(phase, summary);
        self.router.dispatch(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::notification::channels::MockChannel;
    use crate::notification::router::EventFilter;

    #[tokio::test]
    async fn test_auto_approve() {
        let handler = AutoApproveCheckpoint;
        assert!(handler.request_approval("plan", "ok?").await);
        handler.notify("plan", "done").await;
    }

    #[tokio::test]
    async fn test_notify_builds_phase_completed() {
        let mock = MockChannel::new("mock");
        let mut router = NotificationRouter::new();
        router.register(Arc::new(mock.clone()), EventFilter::All);
        let handler = ChannelCheckpointHandler::new(Arc::new(router), "sess-7");

        handler.notify("literature_review", "42 papers").await;

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type(), EventType::PhaseCompleted);
        assert_eq!(sent[0].title(), "Phase complete: literature_review");
        assert_eq!(sent[0].session_id(), "sess-7");
        assert!(!sent[0].requires_response());
    }

    #[tokio::test]
    async fn test_request_approval_uses_router_decision() {
        let responder = MockChannel::responder("r", false, Duration::from_millis(5));
        let mut router = NotificationRouter::new();
        router.register(Arc::new(responder.clone()), EventFilter::All);
        let handler = ChannelCheckpointHandler::new(Arc::new(router), "");
        handler.set_session_id("sess-8");

        assert!(!handler.request_approval("analysis", "run 3 models?").await);

        let sent = responder.sent();
        assert_eq!(sent[0].event_type(), EventType::CheckpointApproval);
        assert_eq!(sent[0].severity(), EventSeverity::Warning);
        assert_eq!(sent[0].title(), "Approval needed: analysis");
        assert_eq!(sent[0].approval_key(), "sess-8:analysis");
        assert!(sent[0].requires_response());
    }

    #[tokio::test]
    async fn test_handlers_as_trait_objects() {
        let handlers: Vec<Box<dyn CheckpointHandler>> = vec![
            Box::new(AutoApproveCheckpoint),
            Box::new(ChannelCheckpointHandler::new(Arc::new(NotificationRouter::new()), "s")),
        ];
        for handler in handlers {
            assert!(handler.request_approval("p", "").await);
        }
    }
}
