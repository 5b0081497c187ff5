//! Notification system module.
//!
//! Fans session events out to console, webhook, email and chat channels and
//! resolves checkpoint approvals from whichever interactive channel answers
//! first.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use apollo_notify::notification::{NotificationsConfig, build_router, ChannelCheckpointHandler, CheckpointHandler};
//!
//! let config = NotificationsConfig::load("notifications.toml")?;
//! let router = Arc::new(build_router(&config));
//! router.connect_all().await;
//!
//! let checkpoint = ChannelCheckpointHandler::new(router.clone(), "mission-42");
//! if checkpoint.request_approval("analysis", "Run 3 models on 12 datasets?").await {
//!     // continue
//! }
//! ```

pub mod channels;
pub mod checkpoint;
pub mod config;
pub mod events;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod session;

pub use channels::NotificationChannel;
pub use checkpoint::{AutoApproveCheckpoint, ChannelCheckpointHandler, CheckpointHandler};
pub use config::{ChannelConfig, NotificationsConfig};
pub use events::{EventSeverity, EventType, NotificationEvent};
pub use heartbeat::{HeartbeatMonitor, HeartbeatState, HeartbeatStatus};
pub use registry::{build_channel, build_router};
pub use router::{EventFilter, NotificationRouter};
pub use session::{SessionInfo, SessionNotifier, SessionOutcome};
