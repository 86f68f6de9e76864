//! In-memory transport that records submitted packets.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Packet, RtmpTransport, TransportError, TransportResult};

/// Transport double that captures every packet instead of touching the
/// network. Clones share state, so a test can keep a handle after the
/// session takes ownership of the original.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<RecorderState>>,
}

#[derive(Debug, Default)]
struct RecorderState {
    packets: Vec<Packet>,
    connected: bool,
    publishing: bool,
    fail_connect: bool,
    fail_sends: bool,
    close_count: u32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets submitted so far, in submission order.
    pub fn packets(&self) -> Vec<Packet> {
        self.inner.lock().packets.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Number of times the link has been torn down.
    pub fn close_count(&self) -> u32 {
        self.inner.lock().close_count
    }

    /// Make the next `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.inner.lock().fail_connect = fail;
    }

    /// Make subsequent sends fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }
}

impl RtmpTransport for RecordingTransport {
    fn connect(&mut self) -> TransportResult<()> {
        let mut state = self.inner.lock();
        if state.fail_connect {
            return Err(TransportError::Connection("recorder rejected connect".into()));
        }
        state.connected = true;
        Ok(())
    }

    fn connect_stream(&mut self) -> TransportResult<()> {
        let mut state = self.inner.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.publishing = true;
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> TransportResult<()> {
        let mut state = self.inner.lock();
        if !state.connected || !state.publishing {
            return Err(TransportError::NotConnected);
        }
        if state.fail_sends {
            return Err(TransportError::Send("recorder configured to fail".into()));
        }
        state.packets.push(packet.clone());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.inner.lock();
        state.connected = false;
        state.publishing = false;
        state.close_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_records_packets_after_connect() {
        let recorder = RecordingTransport::new();
        let mut transport = recorder.clone();

        transport.connect().unwrap();
        transport.connect_stream().unwrap();
        transport
            .send_packet(&Packet::video(Bytes::from_static(&[0x17]), 0))
            .unwrap();

        assert_eq!(recorder.packets().len(), 1);
    }

    #[test]
    fn test_rejects_sends_before_connect() {
        let mut transport = RecordingTransport::new();
        let err = transport
            .send_packet(&Packet::video(Bytes::from_static(&[0x17]), 0))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn test_configurable_send_failure() {
        let recorder = RecordingTransport::new();
        let mut transport = recorder.clone();
        transport.connect().unwrap();
        transport.connect_stream().unwrap();
        recorder.fail_sends(true);

        let err = transport
            .send_packet(&Packet::audio(Bytes::from_static(&[0xAF]), 0))
            .unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));
        assert!(recorder.packets().is_empty());
    }
}
