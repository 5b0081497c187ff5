//! Scenario tests for the notification router.
//!
//! These drive the public API end to end with in-memory channels; no network
//! is touched.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use apollo_notify::notification::channels::{ConsoleChannel, ConsoleConfig, MockChannel};
use apollo_notify::notification::{
    ChannelCheckpointHandler, CheckpointHandler, EventFilter, EventSeverity, EventType,
    NotificationEvent, NotificationRouter, NotificationsConfig, SessionInfo, SessionNotifier,
    SessionOutcome, build_router,
};
use parking_lot::Mutex;
use serde_json::json;

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

fn console(buf: &SharedBuf) -> ConsoleChannel {
    let config = ConsoleConfig {
        colored: false,
        ..Default::default()
    };
    ConsoleChannel::with_writer(config, Box::new(buf.clone()))
}

fn approval(session: &str, phase: &str) -> NotificationEvent {
    NotificationEvent::new(
        EventType::CheckpointApproval,
        session,
        format!("Approval needed: {phase}"),
        "continue?",
    )
    .with_severity(EventSeverity::Warning)
    .with_phase(phase)
    .requiring_response()
}

mod dispatch_tests {
    use super::*;

    #[tokio::test]
    async fn test_console_wildcard_and_filtered_webhook() {
        let buf = SharedBuf::default();
        let webhook = MockChannel::new("webhook");

        let mut router = NotificationRouter::new();
        router.register(Arc::new(console(&buf)), EventFilter::All);
        router.register(
            Arc::new(webhook.clone()),
            EventFilter::from_names(&["session_completed"]),
        );

        let phase_done =
            NotificationEvent::new(EventType::PhaseCompleted, "s1", "Phase complete: plan", "ok");
        router.dispatch(&phase_done).await;

        assert!(buf.contents().contains("Phase complete: plan"));
        assert!(webhook.sent().is_empty());

        let session_done =
            NotificationEvent::new(EventType::SessionCompleted, "s1", "Session complete", "done");
        router.dispatch(&session_done).await;

        assert!(buf.contents().contains("Session complete"));
        let received = webhook.sent();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type(), EventType::SessionCompleted);
    }

    #[tokio::test]
    async fn test_every_channel_failing_still_completes() {
        let mut router = NotificationRouter::new();
        for i in 0..5 {
            router.register(
                Arc::new(MockChannel::new(format!("bad-{i}")).failing_send()),
                EventFilter::All,
            );
        }

        router
            .dispatch(&NotificationEvent::new(EventType::Finding, "s1", "f", "x"))
            .await;
        assert!(router.request_approval(&approval("s1", "plan")).await);
    }

    #[test]
    fn test_event_json_round_trip() {
        let event = NotificationEvent::new(EventType::BudgetWarning, "s1", "Budget at 90%", "$45/$50")
            .with_severity(EventSeverity::Critical)
            .with_detail("spent", 45.0)
            .with_detail("limits", json!({"hard": 50, "soft": 40}));

        let body = serde_json::to_vec(&event).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["event_type"], "budget_warning");
        assert_eq!(value["severity"], "critical");

        let parsed: NotificationEvent = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.event_type(), event.event_type());
        assert_eq!(parsed.severity(), event.severity());
        assert_eq!(parsed.details(), event.details());
    }
}

mod approval_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fast_false_beats_slow_true() {
        let mut router = NotificationRouter::new();
        router.register(
            Arc::new(MockChannel::responder("slow-yes", true, Duration::from_secs(30))),
            EventFilter::All,
        );
        router.register(
            Arc::new(MockChannel::responder("fast-no", false, Duration::from_secs(2))),
            EventFilter::All,
        );

        assert!(!router.request_approval(&approval("s1", "analysis")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_only_channels_do_not_gate_the_decision() {
        let buf = SharedBuf::default();
        let responder = MockChannel::responder("chat", false, Duration::from_secs(1));

        let mut router = NotificationRouter::new();
        router.register(Arc::new(console(&buf)), EventFilter::All);
        router.register(Arc::new(responder.clone()), EventFilter::All);

        assert!(!router.request_approval(&approval("s1", "plan")).await);
        assert_eq!(responder.sent().len(), 1);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(buf.contents().contains("Approval needed: plan"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_handler_round() {
        let responder = MockChannel::responder("chat", true, Duration::from_secs(3));
        let mut router = NotificationRouter::new();
        router.register(Arc::new(responder.clone()), EventFilter::All);
        let router = Arc::new(router);

        let handler = ChannelCheckpointHandler::new(Arc::clone(&router), "mission-1");
        handler.notify("literature_review", "12 papers").await;
        assert!(handler.request_approval("data_acquisition", "fetch 3 datasets?").await);

        let sent = responder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].event_type(), EventType::PhaseCompleted);
        assert_eq!(sent[1].approval_key(), "mission-1:data_acquisition");
        assert_eq!(responder.wait_count(), 1);
    }
}

mod config_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_session_over_configured_router() {
        let config = NotificationsConfig::from_toml_str(
            r#"
enabled = true
heartbeat_interval_secs = 60

[[channels]]
type = "console"
enabled = false
events = ["heartbeat", "session.failed"]

[[channels]]
type = "unknown_kind"
"#,
        )
        .unwrap();

        let mut router = build_router(&config);
        assert!(router.is_empty());

        let buf = SharedBuf::default();
        let recorder = MockChannel::new("recorder");
        let filter = EventFilter::from_names(config.channels[0].events());
        router.register(Arc::new(console(&buf)), filter.clone());
        router.register(Arc::new(recorder.clone()), filter);
        let router = Arc::new(router);

        let notifier = SessionNotifier::open(
            Arc::clone(&router),
            SessionInfo {
                session_id: "mission-9".to_string(),
                mode: "research".to_string(),
                ..Default::default()
            },
            Duration::from_secs(config.heartbeat_interval_secs),
        )
        .await;

        notifier.heartbeat().update_status("analysis", 1, 0.5);
        tokio::time::sleep(Duration::from_secs(61)).await;

        notifier
            .close(SessionOutcome {
                completed: false,
                final_phase: "analysis".to_string(),
                ..Default::default()
            })
            .await;

        let kinds: Vec<_> = recorder.sent().iter().map(|e| e.event_type()).collect();
        assert!(kinds.contains(&EventType::Heartbeat));
        assert_eq!(kinds.last(), Some(&EventType::SessionFailed));
        assert!(!kinds.contains(&EventType::SessionStarted));
        assert!(kinds.iter().all(|k| matches!(k, EventType::Heartbeat | EventType::SessionFailed)));

        let output = buf.contents();
        assert!(output.contains("Running for 1m | phase: analysis | cost: $0.50 | datasets: 1"));
        assert!(!output.contains("session started"));
        assert_eq!(recorder.connect_count(), 1);
        assert_eq!(recorder.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_after_approval_delivers_notice() {
        let webhook = MockChannel::new("webhook");
        let mut router = NotificationRouter::new();
        router.register(Arc::new(webhook.clone()), EventFilter::All);
        let router = Arc::new(router);

        let handler = ChannelCheckpointHandler::new(Arc::clone(&router), "mission-3");
        assert!(handler.request_approval("analysis", "go?").await);
        router.disconnect_all().await;

        let sent = webhook.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type(), EventType::CheckpointApproval);
    }
}
