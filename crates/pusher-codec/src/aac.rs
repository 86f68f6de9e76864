//! AAC packaging: FLV AUDIODATA bodies and the AudioSpecificConfig.

use bytes::{BufMut, Bytes, BytesMut};

/// FLV SoundFormat code for AAC.
const SOUND_FORMAT_AAC: u8 = 10;
/// AAC object type for AAC-LC.
const PROFILE_AAC_LC: u8 = 2;
/// Length of an ADTS header without CRC.
const ADTS_HEADER_LEN: usize = 7;

/// MPEG-4 sampling frequency index for `rate`, defaulting to 44.1 kHz for
/// rates outside the table.
pub fn sample_rate_index(rate: u32) -> u8 {
    match rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        7350 => 12,
        _ => 4,
    }
}

/// First byte of every FLV AUDIODATA body.
///
/// For AAC the receiver takes the real rate and channel layout from the
/// AudioSpecificConfig; the SoundRate bits here are wire decoration only
/// and are kept as the stream has always written them.
fn audio_tag_header(sample_rate: u32, channels: u8) -> u8 {
    let rate_bits: u8 = if sample_rate_index(sample_rate) < 6 {
        0x3
    } else {
        0x2
    };
    let mut header = (SOUND_FORMAT_AAC << 4) | (rate_bits << 2);
    header |= 0x2; // 16-bit samples
    header |= u8::from(channels != 1); // mono/stereo bit
    header
}

/// Build the AAC sequence header tag body.
///
/// Four bytes: the audio tag header, the sequence-header marker, then the
/// two-byte AudioSpecificConfig for AAC-LC.
pub fn sequence_header_body(sample_rate: u32, channels: u8) -> Bytes {
    let index = sample_rate_index(sample_rate);
    let mut body = BytesMut::with_capacity(4);
    body.put_u8(audio_tag_header(sample_rate, channels));
    body.put_u8(0x00); // AAC sequence header
    body.put_u8((PROFILE_AAC_LC << 3) | ((index & 0x0E) >> 1));
    body.put_u8(((index & 0x01) << 7) | (channels << 3));
    body.freeze()
}

/// Build a raw AAC frame tag body, stripping ADTS framing when present.
pub fn frame_body(data: &[u8], sample_rate: u32, channels: u8) -> Bytes {
    let payload = strip_adts(data);
    let mut body = BytesMut::with_capacity(2 + payload.len());
    body.put_u8(audio_tag_header(sample_rate, channels));
    body.put_u8(0x01); // AAC raw
    body.put_slice(payload);
    body.freeze()
}

fn strip_adts(data: &[u8]) -> &[u8] {
    if data.len() > ADTS_HEADER_LEN && data[0] == 0xFF && data[1] & 0xF0 == 0xF0 {
        &data[ADTS_HEADER_LEN..]
    } else {
        data
    }
}
