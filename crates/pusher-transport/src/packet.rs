//! Outbound packet model.

use bytes::Bytes;
use pusher_codec::StreamSettings;

use crate::{INFO_CHANNEL, MEDIA_CHANNEL};

/// RTMP chunk header class requested for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderClass {
    /// Full header with absolute timestamp.
    Large,
    /// Timestamp-delta header.
    Medium,
}

/// Payload of an outbound packet.
#[derive(Debug, Clone)]
pub enum PacketBody {
    /// FLV VIDEODATA tag body.
    Video(Bytes),

    /// FLV AUDIODATA tag body.
    Audio(Bytes),

    /// `@setDataFrame`/`onMetaData` script body, plus the settings it was
    /// built from for links that encode metadata themselves.
    Metadata {
        body: Bytes,
        settings: StreamSettings,
    },
}

impl PacketBody {
    /// Tag body bytes as they count towards `bytes_sent`.
    pub fn bytes(&self) -> &Bytes {
        match self {
            PacketBody::Video(body) | PacketBody::Audio(body) => body,
            PacketBody::Metadata { body, .. } => body,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// One FLV tag queued for the wire.
#[derive(Debug, Clone)]
pub struct Packet {
    pub body: PacketBody,

    /// Chunk stream the tag is submitted on.
    pub channel: u8,

    /// Absolute timestamp in milliseconds.
    pub timestamp_ms: u32,

    pub header: HeaderClass,

    /// Timestamps are absolute, never deltas.
    pub absolute_timestamp: bool,
}

impl Packet {
    /// Video tag on the media channel.
    pub fn video(body: Bytes, timestamp_ms: u32) -> Self {
        Self {
            body: PacketBody::Video(body),
            channel: MEDIA_CHANNEL,
            timestamp_ms,
            header: HeaderClass::Large,
            absolute_timestamp: true,
        }
    }

    /// Audio tag on the media channel.
    pub fn audio(body: Bytes, timestamp_ms: u32) -> Self {
        Self {
            body: PacketBody::Audio(body),
            channel: MEDIA_CHANNEL,
            timestamp_ms,
            header: HeaderClass::Medium,
            absolute_timestamp: true,
        }
    }

    /// `onMetaData` tag on the script-data channel.
    pub fn metadata(body: Bytes, settings: StreamSettings) -> Self {
        Self {
            body: PacketBody::Metadata { body, settings },
            channel: INFO_CHANNEL,
            timestamp_ms: 0,
            header: HeaderClass::Large,
            absolute_timestamp: true,
        }
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self.body, PacketBody::Metadata { .. })
    }
}
