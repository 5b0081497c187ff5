//! Session-scoped notification lifecycle.
//!
//! [`SessionNotifier::open`] connects every channel, announces the session and
//! starts the heartbeat. [`SessionNotifier::close`] reports the outcome and
//! tears everything down again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use super::checkpoint::ChannelCheckpointHandler;
use super::events::{EventSeverity, EventType, NotificationEvent};
use super::heartbeat::HeartbeatMonitor;
use super::router::NotificationRouter;

/// What a session is about.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub session_id: String,
    /// Pipeline mode, e.g. `research` or `translate`.
    pub mode: String,
    pub domain: String,
    pub objective: String,
}

/// Final state reported when a session closes.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub completed: bool,
    pub final_phase: String,
    pub cost_usd: f64,
    pub llm_calls: u64,
    pub datasets_acquired: u64,
}

/// Notification lifecycle of one running session.
pub struct SessionNotifier {
    router: Arc<NotificationRouter>,
    info: SessionInfo,
    heartbeat: HeartbeatMonitor,
}

impl SessionNotifier {
    /// Connect channels, announce the session and start the heartbeat.
    pub async fn open(router: Arc<NotificationRouter>, info: SessionInfo, heartbeat_interval: Duration) -> Self {
        router.connect_all().await;

        let started = NotificationEvent::new(
            EventType::SessionStarted,
            info.session_id.clone(),
            format!("{} session started", title_case(&info.mode)),
            format!("Objective: {}", info.objective),
        )
        .with_detail("mode", info.mode.clone())
        .with_detail("domain", info.domain.clone());
        router.dispatch(&started).await;

        let mut heartbeat = HeartbeatMonitor::new(Arc::clone(&router), info.session_id.clone(), heartbeat_interval);
        heartbeat.start();

        info!(session_id = %info.session_id, mode = %info.mode, "Session notifications open");
        Self {
            router,
            info,
            heartbeat,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Checkpoint handler bound to this session.
    pub fn checkpoint_handler(&self) -> ChannelCheckpointHandler {
        ChannelCheckpointHandler::new(Arc::clone(&self.router), self.info.session_id.clone())
    }

    /// Report the outcome, stop the heartbeat and disconnect all channels.
    pub async fn close(mut self, outcome: SessionOutcome) {
        self.heartbeat
            .update_status(&outcome.final_phase, outcome.datasets_acquired, outcome.cost_usd);
        self.heartbeat.stop().await;

        let event = outcome_event(&self.info, &outcome);
        self.router.dispatch(&event).await;
        self.router.disconnect_all().await;

        info!(session_id = %self.info.session_id, completed = outcome.completed, "Session notifications closed");
    }
}

fn outcome_event(info: &SessionInfo, outcome: &SessionOutcome) -> NotificationEvent {
    let mode = title_case(&info.mode);
    if outcome.completed {
        NotificationEvent::new(
            EventType::SessionCompleted,
            info.session_id.clone(),
            format!("{} session complete", mode),
            format!("Cost: ${:.2} | LLM calls: {}", outcome.cost_usd, outcome.llm_calls),
        )
        .with_detail("cost_usd", json!(outcome.cost_usd))
        .with_detail("llm_calls", outcome.llm_calls)
    } else {
        NotificationEvent::new(
            EventType::SessionFailed,
            info.session_id.clone(),
            format!("{} session failed", mode),
            format!("Ended in phase: {}", outcome.final_phase),
        )
        .with_severity(EventSeverity::Error)
        .with_phase(outcome.final_phase.clone())
        .with_detail("final_phase", outcome.final_phase.clone())
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Session".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels::MockChannel;
    use crate::notification::checkpoint::CheckpointHandler;
    use crate::notification::heartbeat::HeartbeatState;
    use crate::notification::router::EventFilter;

    fn info() -> SessionInfo {
        SessionInfo {
            session_id: "mission-1".to_string(),
            mode: "research".to_string(),
            domain: "bioinformatics".to_string(),
            objective: "Find CRISPR off-target effects".to_string(),
        }
    }

    fn router_with_mock() -> (Arc<NotificationRouter>, MockChannel) {
        let mock = MockChannel::new("mock");
        let mut router = NotificationRouter::new();
        router.register(Arc::new(mock.clone()), EventFilter::All);
        (Arc::new(router), mock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_session_lifecycle() {
        let (router, mock) = router_with_mock();
        let notifier = SessionNotifier::open(router, info(), Duration::from_secs(60)).await;

        assert_eq!(mock.connect_count(), 1);
        assert_eq!(notifier.heartbeat().state(), HeartbeatState::Running);

        tokio::time::sleep(Duration::from_secs(130)).await;
        notifier
            .close(SessionOutcome {
                completed: true,
                final_phase: "complete".to_string(),
                cost_usd: 3.25,
                llm_calls: 17,
                datasets_acquired: 4,
            })
            .await;

        let sent = mock.sent();
        let types: Vec<_> = sent.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            [
                EventType::SessionStarted,
                EventType::Heartbeat,
                EventType::Heartbeat,
                EventType::SessionCompleted,
            ]
        );
        assert_eq!(sent[0].title(), "Research session started");
        assert_eq!(sent[0].details()["domain"], "bioinformatics");
        assert_eq!(sent[3].summary(), "Cost: $3.25 | LLM calls: 17");
        assert_eq!(sent[3].severity(), EventSeverity::Info);
        assert_eq!(mock.disconnect_count(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(mock.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_session_reports_error() {
        let (router, mock) = router_with_mock();
        let notifier = SessionNotifier::open(router, info(), Duration::ZERO).await;

        notifier
            .close(SessionOutcome {
                completed: false,
                final_phase: "analysis".to_string(),
                ..Default::default()
            })
            .await;

        let sent = mock.sent();
        let last = sent.last().unwrap();
        assert_eq!(last.event_type(), EventType::SessionFailed);
        assert_eq!(last.severity(), EventSeverity::Error);
        assert_eq!(last.summary(), "Ended in phase: analysis");
        assert_eq!(last.details()["final_phase"], "analysis");
    }

    #[tokio::test]
    async fn test_checkpoint_handler_is_bound_to_session() {
        let (router, mock) = router_with_mock();
        let notifier = SessionNotifier::open(router, info(), Duration::ZERO).await;

        let handler = notifier.checkpoint_handler();
        handler.notify("plan", "3 steps").await;

        assert_eq!(mock.sent().last().unwrap().session_id(), "mission-1");
        assert_eq!(notifier.session_id(), "mission-1");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("translate"), "Translate");
        assert_eq!(title_case(""), "Session");
    }
}
