use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Failures that end a session before it becomes active
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}
