//! Error types for the presence tracker.

use thiserror::Error;

/// Errors that can occur when tracking presence on a match channel.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The transport could not open a presence channel.
    #[error("failed to open presence channel: {0}")]
    ChannelOpen(String),

    /// Failed to send a frame through the channel.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the channel.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The channel was closed before the operation could complete.
    #[error("presence channel closed")]
    TransportClosed,

    /// The channel refused to store the local presence record.
    #[error("presence record rejected: {0}")]
    TrackRejected(String),

    /// Failed to serialize or deserialize a channel frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A command was sent to a tracker whose background loop has stopped.
    #[error("presence tracker is not running")]
    NotRunning,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for presence operations.
pub type Result<T> = std::result::Result<T, PresenceError>;
