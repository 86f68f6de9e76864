//! RTMP transport for the publisher.
//!
//! The session layer speaks [`RtmpTransport`]; production uses
//! [`RmlRtmpTransport`] over a real server, tests use the in-memory
//! [`RecordingTransport`] and inspect what would have hit the wire.

mod error;
mod packet;
mod recorder;
mod rtmp;

pub use error::TransportError;
pub use packet::{HeaderClass, Packet, PacketBody};
pub use recorder::RecordingTransport;
pub use rtmp::RmlRtmpTransport;

use std::time::Duration;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Default RTMP port when the URL does not carry one.
pub const DEFAULT_PORT: u16 = 1935;

/// Bound on every blocking link operation.
pub const LINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer length hint advertised on the link, in milliseconds.
pub const BUFFER_LENGTH_MS: u32 = 10_000;

/// Chunk stream carrying script data.
pub const INFO_CHANNEL: u8 = 0x03;

/// Chunk stream carrying audio and video tags.
pub const MEDIA_CHANNEL: u8 = 0x04;

/// Contract the publisher requires of an RTMP link.
///
/// Implementations may block on socket I/O; every operation is expected to
/// finish within [`LINK_TIMEOUT`].
pub trait RtmpTransport: Send {
    /// Establish the link: TCP connect, RTMP handshake, `connect`.
    fn connect(&mut self) -> TransportResult<()>;

    /// Open the publishing stream (`createStream` + `publish`).
    fn connect_stream(&mut self) -> TransportResult<()>;

    /// Submit one FLV tag to the link.
    fn send_packet(&mut self, packet: &Packet) -> TransportResult<()>;

    /// Tear the link down. Safe to call more than once.
    fn close(&mut self);
}
