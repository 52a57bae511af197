//! Error types for the telemetry pipeline.

use crate::types::SessionId;
use thiserror::Error;

/// Why an inbound message was dropped by the decoder.
///
/// Always recovered locally: counted, logged, never forwarded to consumers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed payload on {topic}: {payload:?}")]
    Malformed { topic: String, payload: String },

    #[error("Value {value} out of range [{min}, {max}] for channel {channel}")]
    OutOfRange {
        channel: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Startup configuration failure. Fatal before any connection is accepted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Channel name must not be empty (topic {0})")]
    EmptyName(String),

    #[error("Channel defined more than once: {0}")]
    DuplicateChannel(String),

    #[error("Topic mapped more than once: {0}")]
    DuplicateTopic(String),

    #[error("Invalid range for {channel}: min {min} > max {max}")]
    InvalidRange { channel: String, min: f64, max: f64 },

    #[error("Invalid threshold for {channel}: {detail}")]
    InvalidThreshold { channel: String, detail: String },

    #[error("Queue capacity {capacity} cannot hold backlog of {channels} channels")]
    QueueCapacity { capacity: usize, channels: usize },

    #[error("Invalid duration: {0} must be non-zero")]
    InvalidDuration(&'static str),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Session-level failure. Recovered by closing the affected session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session closed: {0}")]
    Closed(SessionId),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Result type for configuration and startup.
pub type Result<T> = std::result::Result<T, ConfigError>;
