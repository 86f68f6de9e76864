//! Error types for the transport crate.

use thiserror::Error;

/// Errors that can occur on the RTMP link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid RTMP URL.
    #[error("invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// Failure while establishing the link or negotiating publish access.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The link rejected an outbound packet.
    #[error("send failed: {0}")]
    Send(String),

    /// Operation on a link that is not connected.
    #[error("not connected")]
    NotConnected,

    /// The operation outlived the link timeout.
    #[error("link operation timed out")]
    Timeout,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
