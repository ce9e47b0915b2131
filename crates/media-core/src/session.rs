//! RTP media session
//!
//! One session bridges one RTP stream to one audio device pair. It owns a
//! UDP socket and runs four loops until stopped:
//!
//! - **receive**: the only reader of the socket; latches the remote address
//!   from the first packet (symmetric RTP) and queues payloads into the
//!   jitter buffer
//! - **playback**: every 20 ms pops a frame, decodes, resamples to the
//!   device rate, applies gain and writes to the sink
//! - **capture**: every 20 ms reads the source, gates echo, resamples to
//!   the codec rate, encodes and sends; silence keeps the sequence going
//!   when the source has nothing
//! - **watchdog**: reports [`MediaEvent::InactivityTimeout`] once when no
//!   RTP has arrived for the configured time

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cellgate_codec_core::{AudioCodec, CodecFactory, CodecType, Downsampler, Upsampler};
use cellgate_rtp_core::{ReceiveOutcome, RtpEndpoint, RtpPacket, RtpSequencer, RtpStats};

use crate::audio::{apply_gain, rms, AudioSink, AudioSource};
use crate::config::MediaConfig;
use crate::echo::EchoGate;
use crate::error::{MediaError, Result};
use crate::jitter::{JitterBuffer, JitterStats};

/// Packetization interval
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Signals a running session raises to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// The first inbound packet fixed the remote address
    RemoteLatched(SocketAddr),
    /// No RTP arrived within the inactivity timeout
    InactivityTimeout,
}

/// Bind a UDP socket on a random even port inside the configured range
pub async fn bind_rtp_socket(config: &MediaConfig) -> Result<UdpSocket> {
    let min = u32::from(config.rtp_port_min);
    let max = u32::from(config.rtp_port_max);
    let first_even = min + (min % 2);
    let no_port = MediaError::NoRtpPort {
        min: config.rtp_port_min,
        max: config.rtp_port_max,
    };
    if first_even > max {
        return Err(no_port);
    }

    let count = (max - first_even) / 2 + 1;
    let offset = rand::thread_rng().gen_range(0..count);
    for i in 0..count {
        let port = first_even + 2 * ((offset + i) % count);
        // port <= max <= u16::MAX
        let port = port as u16;
        match UdpSocket::bind((config.bind_address, port)).await {
            Ok(socket) => {
                debug!(port, "bound RTP socket");
                return Ok(socket);
            }
            Err(e) => debug!(port, error = %e, "RTP port unavailable"),
        }
    }
    Err(no_port)
}

/// Bridges device sample rate and codec sample rate
enum RateAdapter {
    Same,
    Up(Upsampler),
    Down(Downsampler),
}

impl RateAdapter {
    fn new(from: u32, to: u32) -> Result<Self> {
        match (from, to) {
            _ if from == to => Ok(Self::Same),
            (8000, 16000) => Ok(Self::Up(Upsampler::new())),
            (16000, 8000) => Ok(Self::Down(Downsampler::new())),
            _ => Err(MediaError::UnsupportedSampleRate { from, to }),
        }
    }

    fn process(&mut self, frame: Vec<i16>) -> Vec<i16> {
        match self {
            Self::Same => frame,
            Self::Up(up) => up.process(&frame),
            Self::Down(down) => down.process(&frame),
        }
    }
}

/// State shared by the session loops
struct Shared {
    socket: Arc<UdpSocket>,
    remote: Mutex<SocketAddr>,
    latched: AtomicBool,
    payload_type: u8,
    jitter: Mutex<JitterBuffer>,
    echo: Mutex<EchoGate>,
    stats: Mutex<RtpStats>,
    last_rx: Mutex<Instant>,
    events: mpsc::UnboundedSender<MediaEvent>,
}

impl Shared {
    fn remote(&self) -> SocketAddr {
        *self.remote.lock()
    }

    async fn send(&self, packet: RtpPacket) {
        let payload_len = packet.payload.len();
        let remote = self.remote();
        match self.socket.send_to(&packet.serialize(), remote).await {
            Ok(_) => self.stats.lock().record_sent(payload_len),
            Err(e) => debug!(%remote, error = %e, "RTP send failed"),
        }
    }
}

/// A running RTP media session
pub struct MediaSession {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    local_port: u16,
    codec: CodecType,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("local_port", &self.local_port)
            .field("remote", &self.shared.remote())
            .field("codec", &self.codec)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl MediaSession {
    /// Start streaming between `remote` and the given device pair
    ///
    /// Sends one silence packet immediately to open NAT pinholes, then
    /// spawns the session loops. Must be called inside a tokio runtime.
    pub async fn start(
        socket: UdpSocket,
        remote: RtpEndpoint,
        source: Arc<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
        config: &MediaConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MediaEvent>)> {
        let codec = CodecType::from_payload_type(remote.payload_type)?;
        let mut encoder = CodecFactory::create(codec)?;
        let decoder = CodecFactory::create(codec)?;
        let capture_adapter = RateAdapter::new(source.sample_rate(), codec.sample_rate())?;
        let playback_adapter = RateAdapter::new(codec.sample_rate(), sink.sample_rate())?;
        let local_port = socket.local_addr()?.port();

        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            socket: Arc::new(socket),
            remote: Mutex::new(remote.socket_addr()),
            latched: AtomicBool::new(false),
            payload_type: remote.payload_type,
            jitter: Mutex::new(JitterBuffer::new(config.jitter_capacity, config.jitter_target)),
            echo: Mutex::new(EchoGate::new(config.echo.clone())),
            stats: Mutex::new(RtpStats::new()),
            last_rx: Mutex::new(Instant::now()),
            events,
        });

        let mut sequencer = RtpSequencer::new(remote.payload_type, codec.timestamp_step());
        let silence = vec![0i16; codec.frame_samples()];
        let pinhole = encoder.encode(&silence)?;
        shared.send(sequencer.next_packet(pinhole)).await;

        info!(local_port, %remote, %codec, "media session started");

        let cancel = CancellationToken::new();
        tokio::spawn(receive_loop(shared.clone(), cancel.clone()));
        tokio::spawn(playback_loop(
            shared.clone(),
            decoder,
            playback_adapter,
            sink,
            config.playback_gain,
            cancel.clone(),
        ));
        tokio::spawn(capture_loop(
            shared.clone(),
            encoder,
            capture_adapter,
            sequencer,
            source,
            cancel.clone(),
        ));
        tokio::spawn(watchdog_loop(shared.clone(), config.inactivity_timeout(), cancel.clone()));

        let session = Self {
            shared,
            cancel,
            local_port,
            codec,
        };
        Ok((session, rx))
    }

    /// Stop all loops; later calls do nothing
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.shared.jitter.lock().clear();
        let stats = self.stats();
        let jitter = self.jitter_stats();
        info!(
            local_port = self.local_port,
            packets_received = stats.packets_received,
            packets_sent = stats.packets_sent,
            packets_lost = stats.packets_lost,
            duplicates = stats.packets_duplicated,
            out_of_order = stats.packets_out_of_order,
            payload_type_mismatches = stats.payload_type_mismatches,
            telephone_events = stats.telephone_events,
            jitter_overflows = jitter.overflow_drops,
            jitter_underruns = jitter.underruns,
            "media session stopped"
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> RtpStats {
        self.shared.stats.lock().clone()
    }

    pub fn jitter_stats(&self) -> JitterStats {
        self.shared.jitter.lock().stats()
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Where outbound RTP currently goes
    pub fn remote(&self) -> SocketAddr {
        self.shared.remote()
    }

    pub fn codec(&self) -> CodecType {
        self.codec
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let (len, source) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = shared.socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    debug!(error = %e, "RTP receive error");
                    continue;
                }
            },
        };

        let packet = match RtpPacket::parse(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%source, error = %e, "dropping malformed RTP");
                continue;
            }
        };

        if !shared.latched.swap(true, Ordering::AcqRel) {
            let previous = std::mem::replace(&mut *shared.remote.lock(), source);
            if previous != source {
                info!(%previous, latched = %source, "symmetric RTP latched remote address");
            }
            let _ = shared.events.send(MediaEvent::RemoteLatched(source));
        } else if source != shared.remote() {
            debug!(%source, "ignoring RTP from unlatched source");
            continue;
        }

        *shared.last_rx.lock() = Instant::now();
        let outcome = shared
            .stats
            .lock()
            .record_received(&packet.header, packet.payload.len(), shared.payload_type);
        if outcome == ReceiveOutcome::Accept {
            shared.jitter.lock().push(packet.payload);
        }
    }
    debug!("RTP receive loop finished");
}

async fn playback_loop(
    shared: Arc<Shared>,
    mut decoder: Box<dyn AudioCodec>,
    mut adapter: RateAdapter,
    sink: Arc<dyn AudioSink>,
    gain: f32,
    cancel: CancellationToken,
) {
    let codec_samples = decoder.frame_size();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let payload = shared.jitter.lock().pop();
        let decoded = match payload {
            Some(payload) => decoder.decode(&payload).unwrap_or_else(|e| {
                debug!(error = %e, "decode failed, playing silence");
                vec![0; codec_samples]
            }),
            None => vec![0; codec_samples],
        };

        let mut frame = adapter.process(decoded);
        apply_gain(&mut frame, gain);
        sink.write_frame(&frame);
        shared.echo.lock().observe_playback(rms(&frame));
    }
    debug!("playback loop finished");
}

async fn capture_loop(
    shared: Arc<Shared>,
    mut encoder: Box<dyn AudioCodec>,
    mut adapter: RateAdapter,
    mut sequencer: RtpSequencer,
    source: Arc<dyn AudioSource>,
    cancel: CancellationToken,
) {
    let codec_samples = encoder.frame_size();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut suppressed: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = match source.read_frame() {
            Some(mut frame) => {
                if !shared.echo.lock().gate(rms(&frame)).passes() {
                    suppressed += 1;
                    frame.iter_mut().for_each(|s| *s = 0);
                }
                adapter.process(frame)
            }
            None => vec![0; codec_samples],
        };

        let mut frame = frame;
        frame.resize(codec_samples, 0);
        let payload = match encoder.encode(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "encode failed, skipping frame");
                continue;
            }
        };
        shared.send(sequencer.next_packet(payload)).await;
    }
    debug!(suppressed, "capture loop finished");
}

async fn watchdog_loop(shared: Arc<Shared>, timeout: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(timeout.min(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let idle = shared.last_rx.lock().elapsed();
        if idle >= timeout {
            warn!(idle_secs = idle.as_secs(), "no RTP received, reporting inactivity");
            let _ = shared.events.send(MediaEvent::InactivityTimeout);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_adapter_selection() {
        assert!(matches!(RateAdapter::new(8000, 8000), Ok(RateAdapter::Same)));
        assert!(matches!(RateAdapter::new(8000, 16000), Ok(RateAdapter::Up(_))));
        assert!(matches!(RateAdapter::new(16000, 8000), Ok(RateAdapter::Down(_))));
        assert!(matches!(
            RateAdapter::new(44100, 8000),
            Err(MediaError::UnsupportedSampleRate { from: 44100, to: 8000 })
        ));
    }

    #[test]
    fn test_rate_adapter_frame_lengths() {
        let mut up = RateAdapter::new(8000, 16000).unwrap();
        assert_eq!(up.process(vec![0; 160]).len(), 320);
        let mut down = RateAdapter::new(16000, 8000).unwrap();
        assert_eq!(down.process(vec![0; 320]).len(), 160);
    }

    #[tokio::test]
    async fn test_bind_rtp_socket_even_port_in_range() {
        let config = MediaConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            rtp_port_min: 43001,
            rtp_port_max: 43999,
            ..MediaConfig::default()
        };
        let socket = bind_rtp_socket(&config).await.unwrap();
        let port = socket.local_addr().unwrap().port();
        assert_eq!(port % 2, 0);
        assert!((43002..=43998).contains(&port));
    }

    #[tokio::test]
    async fn test_bind_rtp_socket_exhausted() {
        let config = MediaConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            rtp_port_min: 44000,
            rtp_port_max: 44998,
            ..MediaConfig::default()
        };
        let held = bind_rtp_socket(&config).await.unwrap();
        let port = held.local_addr().unwrap().port();

        let narrow = MediaConfig {
            rtp_port_min: port,
            rtp_port_max: port + 1,
            ..config
        };
        assert!(matches!(
            bind_rtp_socket(&narrow).await,
            Err(MediaError::NoRtpPort { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_rtp_socket_no_even_port() {
        let config = MediaConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            rtp_port_min: 45001,
            rtp_port_max: 45001,
            ..MediaConfig::default()
        };
        assert!(matches!(
            bind_rtp_socket(&config).await,
            Err(MediaError::NoRtpPort { min: 45001, max: 45001 })
        ));
    }
}
