//! apollo-notify library crate.
//!
//! Multi-channel notification fan-out and checkpoint approval routing for
//! long-running research sessions.

pub mod error;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
