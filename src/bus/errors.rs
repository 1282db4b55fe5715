//! Error types for bus operations

/// Error types for task bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A message body failed to encode or decode
    #[error("failed to encode task: {0}")]
    Codec(#[from] serde_json::Error),

    /// The bus has been shut down
    #[error("bus shutdown")]
    Shutdown,

    /// The primary topic is at capacity
    #[error("task channel is full (capacity exceeded)")]
    ChannelFull,

    /// The subscription was already taken by another subscriber
    #[error("subscription already active")]
    AlreadySubscribed,

    /// Transport-level failure
    #[error("bus transport error: {0}")]
    Transport(String),
}
