//! RTMP link backed by `rml_rtmp`'s client session.

use std::time::Duration;

use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType, StreamMetadata,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace};
use url::Url;

use pusher_codec::StreamSettings;

use crate::{
    Packet, PacketBody, RtmpTransport, TransportError, TransportResult, BUFFER_LENGTH_MS,
    DEFAULT_PORT, LINK_TIMEOUT,
};

/// Where an RTMP URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    app: String,
    stream_key: String,
}

impl Endpoint {
    /// Split `rtmp://host[:port]/app/streamKey[?auth]`.
    ///
    /// Auth query parameters ride on the stream key, which is how RTMP
    /// ingest servers expect to receive them.
    fn parse(url: &str) -> TransportResult<Self> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        if parsed.scheme() != "rtmp" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        let path = parsed.path().trim_start_matches('/');
        let (app, key) = path
            .rsplit_once('/')
            .ok_or_else(|| TransportError::InvalidUrl("expected /app/streamKey path".to_string()))?;
        if app.is_empty() || key.is_empty() {
            return Err(TransportError::InvalidUrl(
                "expected /app/streamKey path".to_string(),
            ));
        }

        let stream_key = match parsed.query() {
            Some(query) => format!("{key}?{query}"),
            None => key.to_string(),
        };

        Ok(Self {
            host,
            port,
            app: app.to_string(),
            stream_key,
        })
    }

    fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

/// An established link: socket plus protocol session.
struct Link {
    stream: TcpStream,
    session: ClientSession,
    publishing: bool,
}

/// RTMP transport over `rml_rtmp`.
///
/// Owns a current-thread runtime and drives every operation to completion
/// on the calling thread, bounded by [`LINK_TIMEOUT`]. The parsed endpoint
/// lives as long as the transport does.
pub struct RmlRtmpTransport {
    endpoint: Endpoint,
    runtime: Runtime,
    link: Option<Link>,
}

impl RmlRtmpTransport {
    /// Parse the URL and prepare a transport. No I/O happens yet.
    pub fn new(url: &str) -> TransportResult<Self> {
        let endpoint = Endpoint::parse(url)?;
        let runtime = Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self {
            endpoint,
            runtime,
            link: None,
        })
    }
}

impl RtmpTransport for RmlRtmpTransport {
    #[instrument(
        name = "rtmp_connect",
        skip(self),
        fields(host = %self.endpoint.host, app = %self.endpoint.app)
    )]
    fn connect(&mut self) -> TransportResult<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let endpoint = &self.endpoint;
        let link = self.runtime.block_on(async {
            match timeout(LINK_TIMEOUT, establish(endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        })?;

        info!("RTMP connection established");
        self.link = Some(link);
        Ok(())
    }

    #[instrument(name = "rtmp_connect_stream", skip(self))]
    fn connect_stream(&mut self) -> TransportResult<()> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        if link.publishing {
            return Ok(());
        }

        let stream_key = &self.endpoint.stream_key;
        self.runtime.block_on(async {
            match timeout(LINK_TIMEOUT, start_publishing(&mut *link, stream_key)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        })?;

        info!("publish accepted");
        link.publishing = true;
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> TransportResult<()> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        if !link.publishing {
            return Err(TransportError::NotConnected);
        }

        let timestamp = RtmpTimestamp::new(packet.timestamp_ms);
        let result = match &packet.body {
            PacketBody::Video(body) => {
                link.session
                    .publish_video_data(body.clone(), timestamp, false)
            }
            PacketBody::Audio(body) => {
                link.session
                    .publish_audio_data(body.clone(), timestamp, false)
            }
            PacketBody::Metadata { settings, .. } => {
                link.session.publish_metadata(&stream_metadata(settings))
            }
        }
        .map_err(|e| TransportError::Send(format!("{e:?}")))?;

        self.runtime.block_on(async {
            if let ClientSessionResult::OutboundResponse(outbound) = result {
                match timeout(LINK_TIMEOUT, link.stream.write_all(&outbound.bytes)).await {
                    Ok(result) => result?,
                    Err(_) => return Err(TransportError::Timeout),
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!("closing RTMP link");
            let _ = self.runtime.block_on(async {
                timeout(Duration::from_secs(1), link.stream.shutdown()).await
            });
        }
    }
}

impl Drop for RmlRtmpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// TCP connect, RTMP handshake and the `connect` command exchange.
async fn establish(endpoint: &Endpoint) -> TransportResult<Link> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    debug!(%addr, "connecting");

    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| TransportError::Connection(format!("TCP connect failed: {e}")))?;

    let leftover = perform_handshake(&mut stream).await?;
    debug!("handshake complete");

    let mut config = ClientSessionConfig::new();
    config.playback_buffer_length_ms = BUFFER_LENGTH_MS;
    config.tc_url = Some(endpoint.tc_url());

    let (mut session, initial_results) = ClientSession::new(config)
        .map_err(|e| TransportError::Connection(format!("session creation failed: {e:?}")))?;

    for result in initial_results {
        if let ClientSessionResult::OutboundResponse(packet) = result {
            stream.write_all(&packet.bytes).await?;
        }
    }

    if !leftover.is_empty() {
        let results = session
            .handle_input(&leftover)
            .map_err(|e| TransportError::Connection(format!("session input error: {e:?}")))?;
        flush_outbound(&mut stream, results).await?;
    }

    debug!(app = %endpoint.app, "requesting connection");
    let connect_result = session
        .request_connection(endpoint.app.clone())
        .map_err(|e| TransportError::Connection(format!("connection request failed: {e:?}")))?;
    if let ClientSessionResult::OutboundResponse(packet) = connect_result {
        stream.write_all(&packet.bytes).await?;
    }

    pump_until(&mut stream, &mut session, |event| match event {
        ClientSessionEvent::ConnectionRequestAccepted => Some(Ok(())),
        ClientSessionEvent::ConnectionRequestRejected { description } => Some(Err(
            TransportError::Connection(format!("connection rejected: {description}")),
        )),
        other => {
            trace!(?other, "ignoring session event");
            None
        }
    })
    .await?;

    Ok(Link {
        stream,
        session,
        publishing: false,
    })
}

/// Exchange C0/C1/C2 with the server, returning bytes that arrived past the
/// handshake.
async fn perform_handshake(stream: &mut TcpStream) -> TransportResult<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Client);

    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Connection(format!("handshake generation failed: {e:?}")))?;
    stream.write_all(&p0_p1).await?;

    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Connection(
                "connection closed during handshake".to_string(),
            ));
        }

        match handshake.process_bytes(&buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
                return Ok(remaining_bytes);
            }
            Err(e) => {
                return Err(TransportError::Connection(format!("handshake failed: {e:?}")));
            }
        }
    }
}

/// `createStream` + `publish` negotiation.
async fn start_publishing(link: &mut Link, stream_key: &str) -> TransportResult<()> {
    debug!(stream_key, "requesting publish");
    let publish_result = link
        .session
        .request_publishing(stream_key.to_string(), PublishRequestType::Live)
        .map_err(|e| TransportError::Connection(format!("publish request failed: {e:?}")))?;
    if let ClientSessionResult::OutboundResponse(packet) = publish_result {
        link.stream.write_all(&packet.bytes).await?;
    }

    pump_until(&mut link.stream, &mut link.session, |event| match event {
        ClientSessionEvent::PublishRequestAccepted => Some(Ok(())),
        other => {
            trace!(?other, "ignoring session event");
            None
        }
    })
    .await
}

/// Read server traffic into the session until `check` resolves an event.
async fn pump_until<F>(
    stream: &mut TcpStream,
    session: &mut ClientSession,
    mut check: F,
) -> TransportResult<()>
where
    F: FnMut(ClientSessionEvent) -> Option<TransportResult<()>>,
{
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Connection("connection closed".to_string()));
        }

        let results = session
            .handle_input(&buf[..n])
            .map_err(|e| TransportError::Connection(format!("session input error: {e:?}")))?;

        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    stream.write_all(&packet.bytes).await?;
                }
                ClientSessionResult::RaisedEvent(event) => {
                    if let Some(outcome) = check(event) {
                        return outcome;
                    }
                }
                ClientSessionResult::UnhandleableMessageReceived(payload) => {
                    trace!(type_id = payload.type_id, "unhandleable message");
                }
            }
        }
    }
}

async fn flush_outbound(
    stream: &mut TcpStream,
    results: Vec<ClientSessionResult>,
) -> TransportResult<()> {
    for result in results {
        if let ClientSessionResult::OutboundResponse(packet) = result {
            stream.write_all(&packet.bytes).await?;
        }
    }
    Ok(())
}

/// Metadata in the shape the library's own AMF0 encoder expects.
fn stream_metadata(settings: &StreamSettings) -> StreamMetadata {
    let mut metadata = StreamMetadata::new();
    metadata.video_width = Some(settings.width);
    metadata.video_height = Some(settings.height);
    metadata.video_codec_id = Some(7);
    metadata.video_frame_rate = Some(settings.fps as f32);
    metadata.video_bitrate_kbps = Some(settings.video_bitrate / 1000);
    metadata.audio_codec_id = Some(10);
    metadata.audio_bitrate_kbps = Some(64);
    metadata.audio_sample_rate = Some(settings.sample_rate);
    metadata.audio_channels = Some(u32::from(settings.channels));
    metadata.audio_is_stereo = Some(settings.channels > 1);
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_url() {
        let endpoint = Endpoint::parse("rtmp://live.example.com/app/stream-key").unwrap();
        assert_eq!(endpoint.host, "live.example.com");
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.app, "app");
        assert_eq!(endpoint.stream_key, "stream-key");
        assert_eq!(endpoint.tc_url(), "rtmp://live.example.com:1935/app");
    }

    #[test]
    fn test_parses_port_and_nested_app() {
        let endpoint = Endpoint::parse("rtmp://10.0.0.2:19350/live/ingest/key123").unwrap();
        assert_eq!(endpoint.port, 19350);
        assert_eq!(endpoint.app, "live/ingest");
        assert_eq!(endpoint.stream_key, "key123");
    }

    #[test]
    fn test_auth_query_rides_on_stream_key() {
        let endpoint =
            Endpoint::parse("rtmp://h.example/app/key?token=abc&user=x").unwrap();
        assert_eq!(endpoint.stream_key, "key?token=abc&user=x");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(Endpoint::parse("http://example.com/app/key").is_err());
        assert!(Endpoint::parse("rtmp://example.com/apponly").is_err());
        assert!(Endpoint::parse("rtmp://example.com/").is_err());
        assert!(Endpoint::parse("not a url").is_err());
    }
}
