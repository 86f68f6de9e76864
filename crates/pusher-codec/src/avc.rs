//! AVCC packaging: parameter set capture, sequence headers, frame bodies.
//!
//! FLV expects H.264 in AVCC form: an AVCDecoderConfigurationRecord sent
//! once as a "sequence header" tag, then frames whose NAL units carry
//! 4-byte big-endian length prefixes instead of start codes.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::annexb::{NalUnitType, NalUnits};
use crate::error::CodecError;
use crate::CodecResult;

/// FLV video tag header byte: key frame (1) | AVC (7).
const KEYFRAME_AVC: u8 = 0x17;
/// FLV video tag header byte: inter frame (2) | AVC (7).
const INTERFRAME_AVC: u8 = 0x27;

/// Length of the FLV header prefixed to every video tag body.
///
/// A frame body of exactly this length carried nothing but parameter sets.
pub const VIDEO_TAG_HEADER_LEN: usize = 5;

/// Parameter sets found in a buffer. The last occurrence of each wins.
#[derive(Debug, Default)]
pub struct ParameterSets {
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
}

/// Scan `data` for SPS and PPS units.
pub fn extract_parameter_sets(data: &[u8]) -> ParameterSets {
    let mut sets = ParameterSets::default();
    for nal in NalUnits::new(data) {
        match nal.kind {
            NalUnitType::Sps => {
                debug!(len = nal.data.len(), "found SPS");
                sets.sps = Some(Bytes::copy_from_slice(nal.data));
            }
            NalUnitType::Pps => {
                debug!(len = nal.data.len(), "found PPS");
                sets.pps = Some(Bytes::copy_from_slice(nal.data));
            }
            _ => {}
        }
    }
    sets
}

/// Build the AVC sequence header tag body.
///
/// Layout: FLV video tag header, then the AVCDecoderConfigurationRecord
/// (ISO/IEC 14496-15) advertising one SPS and one PPS with 4-byte NAL
/// length prefixes.
pub fn sequence_header_body(sps: &[u8], pps: &[u8]) -> CodecResult<Bytes> {
    if sps.is_empty() || pps.is_empty() {
        return Err(CodecError::MissingParameterSets {
            sps: sps.len(),
            pps: pps.len(),
        });
    }
    if sps.len() < 4 {
        return Err(CodecError::UnsupportedFormat(sps.len()));
    }

    let mut body = BytesMut::with_capacity(16 + sps.len() + pps.len());
    body.put_u8(KEYFRAME_AVC);
    body.put_u8(0x00); // AVC sequence header
    body.put_slice(&[0x00, 0x00, 0x00]); // composition time

    body.put_u8(0x01); // configurationVersion
    body.put_u8(sps[1]); // AVCProfileIndication
    body.put_u8(sps[2]); // profile_compatibility
    body.put_u8(sps[3]); // AVCLevelIndication
    body.put_u8(0xFF); // lengthSizeMinusOne = 3
    body.put_u8(0xE1); // one SPS
    body.put_u16(sps.len() as u16);
    body.put_slice(sps);
    body.put_u8(0x01); // one PPS
    body.put_u16(pps.len() as u16);
    body.put_slice(pps);

    Ok(body.freeze())
}

/// Rewrite an Annex B frame into a length-prefixed video tag body.
///
/// SPS and PPS units are dropped; they travel in the sequence header.
pub fn frame_body(data: &[u8], is_keyframe: bool) -> Bytes {
    let mut body = BytesMut::with_capacity(data.len() + 16);
    body.put_u8(if is_keyframe { KEYFRAME_AVC } else { INTERFRAME_AVC });
    body.put_u8(0x01); // AVC NALU
    body.put_slice(&[0x00, 0x00, 0x00]); // composition time offset

    for nal in NalUnits::new(data) {
        if matches!(nal.kind, NalUnitType::Sps | NalUnitType::Pps) {
            continue;
        }
        body.put_u32(nal.data.len() as u32);
        body.put_slice(nal.data);
    }

    body.freeze()
}
