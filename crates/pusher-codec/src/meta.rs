//! AMF0 encoding of the `@setDataFrame`/`onMetaData` script payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::StreamSettings;

const AMF_NUMBER: u8 = 0x00;
const AMF_BOOLEAN: u8 = 0x01;
const AMF_STRING: u8 = 0x02;
const AMF_ECMA_ARRAY: u8 = 0x08;
const AMF_OBJECT_END: [u8; 3] = [0x00, 0x00, 0x09];

/// Number of entries in the metadata ECMA array. The order is fixed.
const METADATA_ENTRIES: u32 = 12;

/// FLV codec id advertised for H.264.
const VIDEO_CODEC_AVC: f64 = 7.0;
/// FLV codec id advertised for AAC.
const AUDIO_CODEC_AAC: f64 = 10.0;
/// Audio data rate advertised in kbps.
const AUDIO_DATA_RATE_KBPS: f64 = 64.0;

/// Build the `onMetaData` tag body sent on the script-data channel.
pub fn metadata_body(settings: &StreamSettings) -> Bytes {
    let mut body = BytesMut::with_capacity(256);

    put_string(&mut body, "@setDataFrame");
    put_string(&mut body, "onMetaData");

    body.put_u8(AMF_ECMA_ARRAY);
    body.put_u32(METADATA_ENTRIES);

    put_number(&mut body, "width", f64::from(settings.width));
    put_number(&mut body, "height", f64::from(settings.height));
    put_number(&mut body, "videocodecid", VIDEO_CODEC_AVC);
    put_number(
        &mut body,
        "videodatarate",
        f64::from(settings.video_bitrate) / 1000.0,
    );
    put_number(&mut body, "framerate", f64::from(settings.fps));
    put_number(&mut body, "audiocodecid", AUDIO_CODEC_AAC);
    put_number(&mut body, "audiodatarate", AUDIO_DATA_RATE_KBPS);
    put_number(&mut body, "audiosamplerate", f64::from(settings.sample_rate));
    put_number(&mut body, "audiosamplesize", 16.0);
    put_boolean(&mut body, "stereo", settings.channels > 1);
    put_number(&mut body, "duration", 0.0);
    put_number(&mut body, "filesize", 0.0);

    body.put_slice(&AMF_OBJECT_END);
    body.freeze()
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u8(AMF_STRING);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

fn put_key(buf: &mut BytesMut, key: &str) {
    buf.put_u16(key.len() as u16);
    buf.put_slice(key.as_bytes());
}

fn put_number(buf: &mut BytesMut, key: &str, value: f64) {
    put_key(buf, key);
    buf.put_u8(AMF_NUMBER);
    buf.put_f64(value);
}

fn put_boolean(buf: &mut BytesMut, key: &str, value: bool) {
    put_key(buf, key);
    buf.put_u8(AMF_BOOLEAN);
    buf.put_u8(u8::from(value));
}
