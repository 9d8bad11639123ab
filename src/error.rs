//! Error types for the timer engine

/// Errors raised by the authoritative store and the server protocol layer
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A command that can never be applied (bad duration, malformed frame)
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The store lock was poisoned by a panicking writer
    #[error("timer store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors seen by a surface talking to the server
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Commands are suppressed while the connection is down
    #[error("not connected to the timer server")]
    Disconnected,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Errors raised by presentation surfaces
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// The host platform lacks the capability this surface needs
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("media error: {0}")]
    Media(String),

    #[error("invalid overlay url: {0}")]
    InvalidUrl(String),
}

/// Convenience result type for store operations
pub type Result<T> = std::result::Result<T, SyncError>;
