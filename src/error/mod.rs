//! Client error types.
//!
//! None of these reach the user: transport errors feed the reconnect loop,
//! acknowledgment errors are logged, and malformed pushes never become errors.

use thiserror::Error;

/// Client-level errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Notification connection is not open")]
    NotConnected,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocket(Box::new(e))
    }
}

impl From<crate::config::ConfigLoadError> for SyncError {
    fn from(e: crate::config::ConfigLoadError) -> Self {
        SyncError::Config(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
