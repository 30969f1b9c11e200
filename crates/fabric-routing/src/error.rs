use std::time::Duration;

/// Errors that can occur within the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no path found from {src} to {dst}")]
    NoPath { src: String, dst: String },

    #[error("router not connected: {0}")]
    RouterNotConnected(String),

    #[error("router disabled: {0}")]
    RouterDisabled(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Errors raised by a router control channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("control channel closed")]
    Closed,

    #[error("timed out after {0:?} waiting for reply")]
    Timeout(Duration),

    #[error("send failed: {0}")]
    Send(String),

    #[error("unexpected content type: expected {expected}, got {actual}")]
    UnexpectedContentType { expected: u32, actual: u32 },

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}
