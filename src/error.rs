//! Error types for a3s-jetstream

use thiserror::Error;

/// Errors surfaced by the JetStream pub/sub adapter
///
/// Faults inside background delivery loops (ack/nak send failures,
/// unsubscribe-on-cancel failures, metadata extraction failures) are logged
/// and swallowed rather than surfaced here — they have no synchronous caller
/// to report to.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Malformed or missing configuration — fatal to initialization
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connect, authentication, or context-derivation failure — fatal to
    /// initialization; also returned when the adapter is used uninitialized
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subscribe-call failure — fatal to that call only
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscription {
        topic: String,
        reason: String,
    },

    /// Publish failure — per call, not retried internally
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Drain failure on close
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, PubSubError>;
