//! FLV payload packaging for H.264 video and AAC audio.
//!
//! RTMP carries media as FLV tag bodies. This crate turns Annex B H.264
//! buffers and raw or ADTS-framed AAC frames into those bodies, and builds
//! the stream preamble payloads: the AVC and AAC sequence headers and the
//! `@setDataFrame`/`onMetaData` script message.

pub mod aac;
pub mod annexb;
pub mod avc;
pub mod meta;

mod error;

pub use error::CodecError;

use serde::{Deserialize, Serialize};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Stream parameters driving packaging and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Frame width in pixels. Zero until the producer reports it.
    pub width: u32,

    /// Frame height in pixels. Zero until the producer reports it.
    pub height: u32,

    /// Video bitrate in bits per second.
    pub video_bitrate: u32,

    /// Nominal frame rate.
    pub fps: u32,

    /// Audio sample rate in Hz.
    pub sample_rate: u32,

    /// Audio channel count.
    pub channels: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            video_bitrate: 0,
            fps: 30,
            sample_rate: 44100,
            channels: 1,
        }
    }
}
