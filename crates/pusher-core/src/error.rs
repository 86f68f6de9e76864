//! Error types for publishing sessions.

use thiserror::Error;

use pusher_transport::TransportError;

use crate::registry::Handle;

/// Errors surfaced by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Handle not registered, or its link already closed.
    #[error("invalid session handle {0}")]
    InvalidHandle(Handle),

    /// Caller passed an unusable buffer.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Failure while establishing the link. Nothing was registered.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// The link rejected a packet. The session stays open so the caller
    /// can retry or close.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
