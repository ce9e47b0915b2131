//! Media session tests against a fake RTP peer on loopback UDP

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use cellgate_codec_core::{CodecFactory, CodecType};
use cellgate_media_core::{
    bind_rtp_socket, MediaConfig, MediaError, MediaEvent, MediaSession, QueueSource, RecordingSink,
};
use cellgate_rtp_core::{RtpEndpoint, RtpPacket, RtpSequencer};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(2);

struct FakePeer {
    socket: UdpSocket,
    sequencer: RtpSequencer,
}

impl FakePeer {
    async fn bind(payload_type: u8) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            sequencer: RtpSequencer::new(payload_type, 160),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn endpoint(&self, payload_type: u8) -> RtpEndpoint {
        RtpEndpoint::new(LOCALHOST, self.addr().port(), payload_type)
    }

    async fn recv(&self) -> RtpPacket {
        let mut buf = vec![0u8; 2048];
        let (len, _) = timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .expect("no RTP received")
            .unwrap();
        RtpPacket::parse(&buf[..len]).unwrap()
    }

    async fn send_raw(&self, packet: &RtpPacket, port: u16) {
        self.socket
            .send_to(&packet.serialize(), (LOCALHOST, port))
            .await
            .unwrap();
    }

    async fn send(&mut self, payload: Vec<u8>, port: u16) -> RtpPacket {
        let packet = self.sequencer.next_packet(payload);
        self.send_raw(&packet, port).await;
        packet
    }
}

fn config(port_base: u16) -> MediaConfig {
    MediaConfig {
        bind_address: LOCALHOST,
        rtp_port_min: port_base,
        rtp_port_max: port_base + 998,
        ..MediaConfig::default()
    }
}

fn tone(samples: usize, amplitude: f32) -> Vec<i16> {
    (0..samples)
        .map(|i| (amplitude * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 16000.0).sin()) as i16)
        .collect()
}

#[tokio::test]
async fn test_bidirectional_pcma_session() {
    let config = config(46000);
    let mut peer = FakePeer::bind(8).await;
    let socket = bind_rtp_socket(&config).await.unwrap();
    let source = Arc::new(QueueSource::new(16000));
    for _ in 0..5 {
        source.push(tone(320, 8000.0));
    }
    let sink = Arc::new(RecordingSink::new(16000));

    let (session, mut events) =
        MediaSession::start(socket, peer.endpoint(8), source.clone(), sink.clone(), &config)
            .await
            .unwrap();
    let port = session.local_port();
    assert_eq!(session.codec(), CodecType::G711Pcma);

    // pinhole packet, then a continuous stream
    let first = peer.recv().await;
    assert_eq!(first.header.payload_type, 8);
    assert_eq!(first.payload.len(), 160);
    let mut previous = first;
    for _ in 0..8 {
        let packet = peer.recv().await;
        assert_eq!(packet.header.sequence_number, previous.header.sequence_number.wrapping_add(1));
        assert_eq!(packet.header.timestamp, previous.header.timestamp.wrapping_add(160));
        assert_eq!(packet.header.ssrc, previous.header.ssrc);
        assert_eq!(packet.payload.len(), 160);
        previous = packet;
    }

    let mut encoder = CodecFactory::create(CodecType::G711Pcma).unwrap();
    let mut last = None;
    for _ in 0..10 {
        let payload = encoder.encode(&vec![1000i16; 160]).unwrap();
        last = Some(peer.send(payload, port).await);
        sleep(Duration::from_millis(5)).await;
    }
    if let Some(duplicate) = &last {
        peer.send_raw(duplicate, port).await;
    }

    assert_eq!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(MediaEvent::RemoteLatched(peer.addr()))
    );

    sleep(Duration::from_millis(300)).await;
    let stats = session.stats();
    assert_eq!(stats.packets_received, 11);
    assert_eq!(stats.packets_duplicated, 1);
    assert!(stats.packets_sent > 5);
    assert_eq!(source.pending(), 0);

    let frames = sink.frames();
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.len() == 320));
    assert!(frames.iter().any(|f| f.iter().any(|&s| s != 0)));

    session.stop();
    session.stop();
    assert!(session.is_stopped());
}

#[tokio::test]
async fn test_symmetric_rtp_latches_first_source() {
    let config = config(47000);
    let signalled = FakePeer::bind(8).await;
    let mut actual = FakePeer::bind(8).await;
    let socket = bind_rtp_socket(&config).await.unwrap();
    let source = Arc::new(QueueSource::new(8000));
    let sink = Arc::new(RecordingSink::new(8000));

    let (session, mut events) =
        MediaSession::start(socket, signalled.endpoint(8), source, sink, &config)
            .await
            .unwrap();
    let port = session.local_port();
    signalled.recv().await;

    actual.send(vec![0xD5; 160], port).await;
    assert_eq!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(MediaEvent::RemoteLatched(actual.addr()))
    );
    assert_eq!(session.remote(), actual.addr());

    // outbound media follows the latched address
    let packet = actual.recv().await;
    assert_eq!(packet.payload.len(), 160);

    let mut other = FakePeer::bind(8).await;
    other.send(vec![0xD5; 160], port).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(session.stats().packets_received, 1);

    session.stop();
}

#[tokio::test]
async fn test_silence_keeps_sequence_when_source_is_empty() {
    let config = config(48000);
    let peer = FakePeer::bind(9).await;
    let socket = bind_rtp_socket(&config).await.unwrap();
    let source = Arc::new(QueueSource::new(16000));
    let sink = Arc::new(RecordingSink::new(16000));

    let (session, _events) = MediaSession::start(socket, peer.endpoint(9), source, sink, &config)
        .await
        .unwrap();
    assert_eq!(session.codec(), CodecType::G722);

    let mut previous = peer.recv().await;
    for _ in 0..5 {
        let packet = peer.recv().await;
        assert_eq!(packet.header.payload_type, 9);
        assert_eq!(packet.payload.len(), 160);
        assert_eq!(packet.header.sequence_number, previous.header.sequence_number.wrapping_add(1));
        assert_eq!(packet.header.timestamp, previous.header.timestamp.wrapping_add(160));
        previous = packet;
    }
    session.stop();
}

#[tokio::test]
async fn test_inactivity_timeout_reported_once() {
    let config = MediaConfig {
        inactivity_timeout_secs: 1,
        ..config(49000)
    };
    let peer = FakePeer::bind(8).await;
    let socket = bind_rtp_socket(&config).await.unwrap();
    let source = Arc::new(QueueSource::new(8000));
    let sink = Arc::new(RecordingSink::new(8000));

    let (session, mut events) = MediaSession::start(socket, peer.endpoint(8), source, sink, &config)
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(4), events.recv()).await.unwrap();
    assert_eq!(event, Some(MediaEvent::InactivityTimeout));
    assert!(timeout(Duration::from_millis(1500), events.recv()).await.is_err());
    session.stop();
}

#[tokio::test]
async fn test_unknown_payload_type_rejected() {
    let config = config(50000);
    let peer = FakePeer::bind(18).await;
    let socket = bind_rtp_socket(&config).await.unwrap();
    let source = Arc::new(QueueSource::new(8000));
    let sink = Arc::new(RecordingSink::new(8000));

    let result = MediaSession::start(socket, peer.endpoint(18), source, sink, &config).await;
    assert!(matches!(result, Err(MediaError::Codec(_))));
}
