//! Crate-wide error types.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel {channel} failed: {message}")]
    Channel { channel: String, message: String },

    #[error("Email error: {0}")]
    Email(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display() {
        let err = Error::channel("telegram", "sendMessage failed: 400");
        assert_eq!(
            err.to_string(),
            "Channel telegram failed: sendMessage failed: 400"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::config("missing webhook url");
        assert!(err.to_string().starts_with("Configuration error"));
    }
}
