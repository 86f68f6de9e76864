//! Handle-based RTMP live publishing.
//!
//! A producer feeds encoded H.264 Annex B buffers and AAC frames; the crate
//! packages them into FLV tag bodies and pushes them over an RTMP session.
//! Sessions are addressed by opaque `u64` handles so the API maps directly
//! onto foreign-function bindings:
//!
//! ```no_run
//! use pusher_core::{open, set_metadata, send_video, close, StreamSettings};
//!
//! # fn demo(frame: &[u8]) -> Result<(), pusher_core::SessionError> {
//! let handle = open("rtmp://live.example.com/app/stream-key")?;
//! set_metadata(handle, StreamSettings {
//!     width: 1280,
//!     height: 720,
//!     video_bitrate: 2_000_000,
//!     fps: 30,
//!     sample_rate: 44100,
//!     channels: 2,
//! })?;
//! send_video(handle, frame, 0, true)?;
//! close(handle);
//! # Ok(())
//! # }
//! ```
//!
//! All operations serialize on one process-wide lock; within a session the
//! preamble (AVC sequence header, AAC sequence header, `onMetaData`) is
//! guaranteed to precede media on the wire.

mod error;
mod registry;
mod session;

pub use error::SessionError;
pub use registry::{Handle, Registry};
pub use session::{Session, StreamStats};

pub use pusher_codec::StreamSettings;
pub use pusher_transport::{RtmpTransport, TransportError};

use tracing::{debug, info};

use pusher_transport::RmlRtmpTransport;

/// Open a publishing session against `url`.
///
/// The URL has the shape `rtmp://host[:port]/app/streamKey[?auth]`. The call
/// blocks through TCP connect, RTMP handshake and publish negotiation,
/// bounded by the link timeout. On failure everything is torn down and no
/// handle is registered.
pub fn open(url: &str) -> Result<Handle, SessionError> {
    let transport = RmlRtmpTransport::new(url).map_err(SessionError::Connect)?;
    open_with(Box::new(transport))
}

/// Open a session over a caller-supplied transport.
///
/// This is the seam for custom links and for tests driving a recorder.
pub fn open_with(transport: Box<dyn RtmpTransport>) -> Result<Handle, SessionError> {
    let mut registry = registry::global().lock();
    let session = Session::open(transport)?;
    let handle = registry.insert(session);
    info!(handle, "session opened");
    Ok(handle)
}

/// Update stream parameters for `handle`.
///
/// Changing the resolution re-arms the preamble so the next keyframe
/// re-emits the AVC sequence header and `onMetaData`.
pub fn set_metadata(handle: Handle, settings: StreamSettings) -> Result<(), SessionError> {
    let mut registry = registry::global().lock();
    registry.get_mut(handle)?.set_settings(settings);
    Ok(())
}

/// Package and submit one Annex B video buffer.
///
/// `timestamp_ms` is an absolute presentation time in milliseconds; it is
/// truncated to the 32-bit RTMP timestamp.
pub fn send_video(
    handle: Handle,
    data: &[u8],
    timestamp_ms: i64,
    is_keyframe: bool,
) -> Result<(), SessionError> {
    let mut registry = registry::global().lock();
    registry
        .get_mut(handle)?
        .send_video(data, timestamp_ms as u32, is_keyframe)
}

/// Package and submit one AAC frame (raw or ADTS-framed).
///
/// `timestamp_ms` is an absolute presentation time in milliseconds.
pub fn send_audio(handle: Handle, data: &[u8], timestamp_ms: i64) -> Result<(), SessionError> {
    let mut registry = registry::global().lock();
    registry
        .get_mut(handle)?
        .send_audio(data, timestamp_ms as u32)
}

/// Report transmission counters for `handle`.
pub fn get_stats(handle: Handle) -> Result<StreamStats, SessionError> {
    let mut registry = registry::global().lock();
    Ok(registry.get_mut(handle)?.stats())
}

/// Close `handle`'s session and forget it. Unknown handles are ignored.
pub fn close(handle: Handle) {
    let mut registry = registry::global().lock();
    if let Some(mut session) = registry.remove(handle) {
        session.close();
        debug!(handle, "session closed");
    }
}

/// Close every session and empty the registry.
///
/// Handle allocation keeps running, so handles from before a shutdown are
/// never reissued.
pub fn shutdown() {
    registry::global().lock().shutdown();
}
