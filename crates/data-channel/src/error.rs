//! Error types for the data channels.

/// Errors produced by the UDP/TCP data channels.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("failed to resolve {0}")]
    Resolve(String),

    #[error("connection timed out")]
    Timeout,
}
