//! Shared helpers.

pub mod http_client;
