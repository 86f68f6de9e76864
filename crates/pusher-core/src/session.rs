//! Per-stream publishing state.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use pusher_codec::{aac, avc, meta, StreamSettings};
use pusher_transport::{Packet, RtmpTransport};

use crate::error::SessionError;

/// Counters reported for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// FLV tag body bytes accepted by the transport.
    pub bytes_sent: u64,

    /// The link does not measure delay; always 0.
    pub delay_ms: u64,

    /// The link does not measure loss; always 0.
    pub loss_pct: u64,
}

/// Which call is asking for `onMetaData` emission.
enum MetadataTrigger {
    Video,
    Audio,
}

/// One RTMP publishing session.
///
/// Owns its transport exclusively. The preamble (AVC sequence header, AAC
/// sequence header, `onMetaData`) is emitted inline with the first media
/// call that makes each part possible, and re-armed by a resolution change.
pub struct Session {
    transport: Box<dyn RtmpTransport>,
    connected: bool,
    settings: StreamSettings,
    sps: Bytes,
    pps: Bytes,
    sent_video_config: bool,
    sent_audio_config: bool,
    sent_metadata: bool,
    bytes_sent: u64,
}

impl Session {
    /// Connect the transport and open the publish stream.
    ///
    /// On failure the transport is dropped and no session exists.
    pub fn open(mut transport: Box<dyn RtmpTransport>) -> Result<Self, SessionError> {
        transport.connect().map_err(SessionError::Connect)?;
        transport.connect_stream().map_err(SessionError::Connect)?;

        Ok(Self {
            transport,
            connected: true,
            settings: StreamSettings::default(),
            sps: Bytes::new(),
            pps: Bytes::new(),
            sent_video_config: false,
            sent_audio_config: false,
            sent_metadata: false,
            bytes_sent: 0,
        })
    }

    /// Update stream parameters.
    ///
    /// A resolution change re-arms the preamble: SPS/PPS are re-learned
    /// from the stream and the next keyframe re-emits the sequence header
    /// and `onMetaData`.
    pub fn set_settings(&mut self, settings: StreamSettings) {
        let old = self.settings;
        let resolution_changed = old.width != 0
            && old.height != 0
            && (settings.width != old.width || settings.height != old.height);

        self.settings = settings;

        if resolution_changed {
            debug!(
                width = settings.width,
                height = settings.height,
                "resolution changed, re-arming preamble"
            );
            self.sent_video_config = false;
            self.sent_metadata = false;
            self.sps = Bytes::new();
            self.pps = Bytes::new();
        }
    }

    /// Package and submit one Annex B video buffer.
    ///
    /// Emits the AVC sequence header and `onMetaData` first when they are
    /// due. A buffer that carries only parameter sets succeeds without
    /// producing a frame tag.
    #[instrument(name = "send_video", skip(self, data), fields(len = data.len()))]
    pub fn send_video(
        &mut self,
        data: &[u8],
        timestamp_ms: u32,
        is_keyframe: bool,
    ) -> Result<(), SessionError> {
        if data.is_empty() {
            return Err(SessionError::InvalidInput("empty video buffer"));
        }

        let sets = avc::extract_parameter_sets(data);
        if let Some(sps) = sets.sps {
            self.sps = sps;
        }
        if let Some(pps) = sets.pps {
            self.pps = pps;
        }

        if !self.sent_video_config && !self.sps.is_empty() && !self.pps.is_empty() {
            match avc::sequence_header_body(&self.sps, &self.pps) {
                Ok(body) => {
                    // Stamped with the triggering frame's time so receivers
                    // re-align after a resolution switch.
                    self.submit(Packet::video(body, timestamp_ms))?;
                    self.sent_video_config = true;
                    debug!("AVC sequence header sent");
                }
                Err(err) => {
                    warn!(%err, "holding back AVC sequence header");
                }
            }
        }

        self.maybe_send_metadata(MetadataTrigger::Video);

        let body = avc::frame_body(data, is_keyframe);
        if body.len() <= avc::VIDEO_TAG_HEADER_LEN {
            trace!("buffer carried only parameter sets");
            return Ok(());
        }
        if !self.sent_video_config {
            trace!("dropping frame until the sequence header is out");
            return Ok(());
        }

        self.submit(Packet::video(body, timestamp_ms))
    }

    /// Package and submit one AAC frame, raw or ADTS-framed.
    #[instrument(name = "send_audio", skip(self, data), fields(len = data.len()))]
    pub fn send_audio(&mut self, data: &[u8], timestamp_ms: u32) -> Result<(), SessionError> {
        if data.is_empty() {
            return Err(SessionError::InvalidInput("empty audio buffer"));
        }

        if !self.sent_audio_config {
            let body = aac::sequence_header_body(self.settings.sample_rate, self.settings.channels);
            self.submit(Packet::audio(body, 0))?;
            self.sent_audio_config = true;
            debug!("AAC sequence header sent");
        }

        self.maybe_send_metadata(MetadataTrigger::Audio);

        let body = aac::frame_body(data, self.settings.sample_rate, self.settings.channels);
        self.submit(Packet::audio(body, timestamp_ms))
    }

    /// Emit `onMetaData` once the triggering path has what it needs.
    ///
    /// A failed submit leaves `sent_metadata` unset so the next eligible
    /// call retries.
    fn maybe_send_metadata(&mut self, trigger: MetadataTrigger) {
        if self.sent_metadata {
            return;
        }

        let eligible = match trigger {
            MetadataTrigger::Video => {
                self.sent_video_config && self.settings.width > 0 && self.settings.height > 0
            }
            // Audio-only publishing (e.g. backgrounded capture) still gets
            // metadata out once the dimensions are known.
            MetadataTrigger::Audio => self.settings.width > 0 && self.settings.sample_rate > 0,
        };
        if !eligible {
            return;
        }

        let body = meta::metadata_body(&self.settings);
        match self.submit(Packet::metadata(body, self.settings)) {
            Ok(()) => {
                self.sent_metadata = true;
                debug!(
                    width = self.settings.width,
                    height = self.settings.height,
                    "onMetaData sent"
                );
            }
            Err(err) => warn!(%err, "failed to send onMetaData"),
        }
    }

    /// Hand one packet to the transport and account for its body.
    fn submit(&mut self, packet: Packet) -> Result<(), SessionError> {
        let len = packet.body.len() as u64;
        self.transport.send_packet(&packet)?;
        self.bytes_sent += len;
        Ok(())
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            bytes_sent: self.bytes_sent,
            delay_ms: 0,
            loss_pct: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Close the link. Safe to call more than once.
    pub fn close(&mut self) {
        if self.connected {
            self.transport.close();
            self.connected = false;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use pusher_transport::{PacketBody, RecordingTransport, TransportError};

    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xDA, 0x01, 0x40];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x10, 0x20];

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        for nal in nals {
            data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            data.extend_from_slice(nal);
        }
        data
    }

    fn keyframe() -> Vec<u8> {
        annexb(&[SPS, PPS, IDR])
    }

    fn hd_settings() -> StreamSettings {
        StreamSettings {
            width: 1280,
            height: 720,
            video_bitrate: 2_000_000,
            fps: 30,
            sample_rate: 44100,
            channels: 2,
        }
    }

    fn open_session() -> (Session, RecordingTransport) {
        let recorder = RecordingTransport::new();
        let session = Session::open(Box::new(recorder.clone())).unwrap();
        (session, recorder)
    }

    #[test]
    fn test_keyframe_bootstraps_preamble_in_order() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());
        session.send_video(&keyframe(), 0, true).unwrap();

        let packets = recorder.packets();
        assert_eq!(packets.len(), 3);

        // AVC sequence header first.
        match &packets[0].body {
            PacketBody::Video(body) => {
                assert_eq!(body[0], 0x17);
                assert_eq!(body[1], 0x00);
            }
            other => panic!("expected video, got {other:?}"),
        }
        // Then onMetaData.
        assert!(packets[1].is_metadata());
        // Then the frame itself.
        match &packets[2].body {
            PacketBody::Video(body) => {
                assert_eq!(body[0], 0x17);
                assert_eq!(body[1], 0x01);
            }
            other => panic!("expected video, got {other:?}"),
        }

        assert!(session.stats().bytes_sent > 0);
    }

    #[test]
    fn test_frames_before_parameter_sets_are_dropped_silently() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());

        session.send_video(&annexb(&[IDR]), 0, false).unwrap();
        assert!(recorder.packets().is_empty());

        // The keyframe with parameter sets unblocks everything.
        session.send_video(&keyframe(), 40, true).unwrap();
        assert_eq!(recorder.packets().len(), 3);
    }

    #[test]
    fn test_parameter_sets_only_buffer_sends_config_but_no_frame() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());

        session.send_video(&annexb(&[SPS, PPS]), 0, true).unwrap();

        let packets = recorder.packets();
        // Sequence header and metadata, but no frame tag.
        assert_eq!(packets.len(), 2);
        match &packets[0].body {
            PacketBody::Video(body) => assert_eq!(body[1], 0x00),
            other => panic!("expected video, got {other:?}"),
        }
        assert!(packets[1].is_metadata());
    }

    #[test]
    fn test_metadata_waits_for_dimensions() {
        let (mut session, recorder) = open_session();
        // No set_settings: width/height are zero.
        session.send_video(&keyframe(), 0, true).unwrap();

        let packets = recorder.packets();
        assert_eq!(packets.len(), 2); // sequence header + frame
        assert!(packets.iter().all(|p| !p.is_metadata()));
    }

    #[test]
    fn test_resolution_change_reemits_preamble() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());
        session.send_video(&keyframe(), 0, true).unwrap();

        for i in 1..=30 {
            session
                .send_video(&annexb(&[&[0x41, 0x9A, i as u8]]), i * 33, false)
                .unwrap();
        }

        session.set_settings(StreamSettings {
            width: 1920,
            height: 1080,
            ..hd_settings()
        });

        let new_sps: &[u8] = &[0x67, 0x64, 0x00, 0x28, 0xAC];
        session
            .send_video(&annexb(&[new_sps, PPS, IDR]), 1024, true)
            .unwrap();

        let packets = recorder.packets();
        let sequence_headers: Vec<_> = packets
            .iter()
            .filter(|p| matches!(&p.body, PacketBody::Video(b) if b[1] == 0x00))
            .collect();
        let metadata: Vec<_> = packets.iter().filter(|p| p.is_metadata()).collect();

        assert_eq!(sequence_headers.len(), 2);
        assert_eq!(metadata.len(), 2);

        // The second sequence header advertises the new SPS and carries the
        // triggering keyframe's timestamp.
        match &sequence_headers[1].body {
            PacketBody::Video(body) => assert_eq!(body[6], new_sps[1]),
            other => panic!("expected video, got {other:?}"),
        }
        assert_eq!(sequence_headers[1].timestamp_ms, 1024);
    }

    #[test]
    fn test_audio_first_emits_config_then_frame_without_metadata() {
        let (mut session, recorder) = open_session();
        session.set_settings(StreamSettings {
            width: 0,
            height: 0,
            sample_rate: 44100,
            channels: 1,
            ..StreamSettings::default()
        });

        let mut adts = vec![0xFF, 0xF1, 0x50, 0x80, 0x02, 0x9F, 0xFC];
        adts.extend(std::iter::repeat(0x42).take(57));
        session.send_audio(&adts, 0).unwrap();

        let packets = recorder.packets();
        assert_eq!(packets.len(), 2);
        match &packets[0].body {
            PacketBody::Audio(body) => assert_eq!(body.as_ref(), &[0xAE, 0x00, 0x12, 0x08]),
            other => panic!("expected audio, got {other:?}"),
        }
        match &packets[1].body {
            PacketBody::Audio(body) => {
                assert_eq!(body[1], 0x01);
                // ADTS header is gone.
                assert_eq!(body.len(), 2 + 57);
            }
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_with_known_dimensions_triggers_metadata() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());

        session.send_audio(&[0x21, 0x42, 0x63], 0).unwrap();

        let packets = recorder.packets();
        assert_eq!(packets.len(), 3);
        assert!(packets[1].is_metadata());
    }

    #[test]
    fn test_failed_audio_config_blocks_raw_frame() {
        let (mut session, recorder) = open_session();
        recorder.fail_sends(true);

        let err = session.send_audio(&[0x21, 0x42], 0).unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Send(_))));
        assert!(recorder.packets().is_empty());

        // Preamble state was preserved; a retry completes it.
        recorder.fail_sends(false);
        session.send_audio(&[0x21, 0x42], 23).unwrap();
        assert_eq!(recorder.packets().len(), 2);
    }

    #[test]
    fn test_short_sps_holds_back_sequence_header_without_failing() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());

        let stub_sps: &[u8] = &[0x67, 0x42];
        session
            .send_video(&annexb(&[stub_sps, PPS, IDR]), 0, true)
            .unwrap();
        // Nothing was sent: no config, so no metadata and no frame.
        assert!(recorder.packets().is_empty());

        // A usable SPS recovers the stream.
        session.send_video(&keyframe(), 40, true).unwrap();
        assert_eq!(recorder.packets().len(), 3);
    }

    #[test]
    fn test_empty_buffers_are_rejected() {
        let (mut session, _recorder) = open_session();
        assert!(matches!(
            session.send_video(&[], 0, true),
            Err(SessionError::InvalidInput(_))
        ));
        assert!(matches!(
            session.send_audio(&[], 0),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bytes_sent_sums_accepted_tag_bodies() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());
        session.send_video(&keyframe(), 0, true).unwrap();
        session.send_audio(&[0x21, 0x42, 0x63], 0).unwrap();

        let total: usize = recorder.packets().iter().map(|p| p.body.len()).sum();
        assert_eq!(session.stats().bytes_sent, total as u64);
        assert_eq!(session.stats().delay_ms, 0);
        assert_eq!(session.stats().loss_pct, 0);
    }

    #[test]
    fn test_failed_frame_send_keeps_session_open() {
        let (mut session, recorder) = open_session();
        session.set_settings(hd_settings());
        session.send_video(&keyframe(), 0, true).unwrap();
        let sent_before = session.stats().bytes_sent;

        recorder.fail_sends(true);
        let err = session
            .send_video(&annexb(&[&[0x41, 0x9A]]), 33, false)
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(session.is_connected());
        assert_eq!(session.stats().bytes_sent, sent_before);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut session, recorder) = open_session();
        session.close();
        session.close();
        assert_eq!(recorder.close_count(), 1);
        assert!(!session.is_connected());
    }
}
