//! User agent tests against a fake registrar/PBX on loopback UDP

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use cellgate_dialog_core::{RegistrationState, SipConfig, SipEvent, SipUserAgent, TimerSettings};
use cellgate_sip_core::builder;
use cellgate_sip_core::{Method, SipMessage};

const WAIT: Duration = Duration::from_secs(2);

const PBX_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 40000 RTP/AVP 8 101\r\na=rtpmap:8 PCMA/8000\r\n";

struct FakePbx {
    socket: UdpSocket,
}

impl FakePbx {
    async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn recv_within(&self, limit: Duration) -> Option<(SipMessage, SocketAddr)> {
        let mut buf = vec![0u8; 65535];
        let (len, from) = timeout(limit, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;
        Some((SipMessage::parse(&buf[..len]).unwrap(), from))
    }

    async fn recv(&self) -> (SipMessage, SocketAddr) {
        self.recv_within(WAIT).await.expect("nothing received")
    }

    async fn send(&self, message: &SipMessage, to: SocketAddr) {
        self.socket.send_to(&message.to_bytes(), to).await.unwrap();
    }
}

fn config(server: SocketAddr) -> SipConfig {
    SipConfig {
        username: "1001".into(),
        password: "secret".into(),
        domain: "127.0.0.1".into(),
        registrar_port: server.port(),
        bind_address: "127.0.0.1".parse().unwrap(),
        local_port: 0,
        stun_enabled: false,
        register_retry_delay_secs: 0,
        ..SipConfig::default()
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SipEvent>) -> SipEvent {
    timeout(WAIT, rx.recv()).await.expect("no event").expect("event stream closed")
}

#[tokio::test]
async fn test_register_answers_one_challenge() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(config(pbx.addr())).await.unwrap();
    let mut events = ua.subscribe();

    let registering = tokio::spawn({
        let ua = ua.clone();
        async move { ua.register().await }
    });

    let (first, from) = pbx.recv().await;
    assert_eq!(first.method(), Some(&Method::Register));
    assert!(first.header("Authorization").is_none());
    let challenge = builder::response(&first, 401, "Unauthorized", Some("srv"))
        .with_header("WWW-Authenticate", "Digest realm=\"pbx\", nonce=\"abc123\"");
    pbx.send(&challenge, from).await;

    let (second, from) = pbx.recv().await;
    let authorization = second.header("Authorization").unwrap();
    assert!(authorization.contains("username=\"1001\""));
    assert!(authorization.contains("nonce=\"abc123\""));
    assert_eq!(second.cseq().unwrap().seq, first.cseq().unwrap().seq + 1);
    assert_eq!(second.call_id().unwrap(), first.call_id().unwrap());
    pbx.send(&builder::response(&second, 200, "OK", Some("srv")), from).await;

    registering.await.unwrap().unwrap();
    assert_eq!(ua.registration_state(), RegistrationState::Registered);
    assert_eq!(next_event(&mut events).await, SipEvent::Registration(RegistrationState::Registering));
    assert_eq!(next_event(&mut events).await, SipEvent::Registration(RegistrationState::Registered));
    ua.shutdown().await;
}

#[tokio::test]
async fn test_register_reports_failure_after_three_attempts() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(config(pbx.addr())).await.unwrap();

    let registering = tokio::spawn({
        let ua = ua.clone();
        async move { ua.register().await }
    });

    let mut attempts = 0;
    while let Some((request, from)) = pbx.recv_within(Duration::from_millis(500)).await {
        assert_eq!(request.method(), Some(&Method::Register));
        attempts += 1;
        pbx.send(&builder::response(&request, 403, "Forbidden", Some("srv")), from).await;
    }

    assert_eq!(attempts, 3);
    assert!(registering.await.unwrap().is_err());
    assert!(matches!(ua.registration_state(), RegistrationState::Failed(reason) if reason.contains("403")));
}

#[tokio::test]
async fn test_outbound_answer_acks_every_200_once() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(config(pbx.addr())).await.unwrap();
    let mut events = ua.subscribe();

    let call_id = ua.place_call("100", "v=0\r\n".into()).unwrap();
    let (invite, from) = pbx.recv().await;
    assert_eq!(invite.method(), Some(&Method::Invite));
    assert_eq!(invite.call_id().unwrap(), call_id);
    assert_eq!(invite.request_uri(), Some("sip:100@127.0.0.1"));

    pbx.send(&builder::response(&invite, 180, "Ringing", Some("pbx1")), from).await;
    assert_eq!(next_event(&mut events).await, SipEvent::CallRinging { call_id: call_id.clone() });

    let ok = builder::response(&invite, 200, "OK", Some("pbx1"))
        .with_header("Contact", format!("<sip:100@{}>", pbx.addr()))
        .with_body("application/sdp", PBX_SDP);
    pbx.send(&ok, from).await;

    let (ack, _) = pbx.recv().await;
    assert_eq!(ack.method(), Some(&Method::Ack));
    assert_eq!(ack.header("CSeq"), Some("1 ACK"));
    match next_event(&mut events).await {
        SipEvent::CallAnswered { endpoint, .. } => {
            assert_eq!(endpoint.port, 40000);
            assert_eq!(endpoint.payload_type, 8);
        }
        other => panic!("unexpected event {other:?}"),
    }

    pbx.send(&ok, from).await;
    let (again, _) = pbx.recv().await;
    assert_eq!(again.method(), Some(&Method::Ack));
    assert_eq!(again.header("CSeq"), Some("1 ACK"));
    assert!(pbx.recv_within(Duration::from_millis(300)).await.is_none());
    assert!(events.try_recv().is_err());

    ua.hangup(&call_id).unwrap();
    let (bye, _) = pbx.recv().await;
    assert_eq!(bye.method(), Some(&Method::Bye));
    assert_eq!(bye.to_tag(), Some("pbx1"));
}

#[tokio::test]
async fn test_invite_retransmission_is_capped() {
    let pbx = FakePbx::bind().await;
    let mut cfg = config(pbx.addr());
    cfg.timers = TimerSettings {
        t1_ms: 50,
        t2_ms: 400,
        max_invite_transmissions: 7,
    };
    let ua = SipUserAgent::start(cfg).await.unwrap();
    let call_id = ua.place_call("100", "v=0\r\n".into()).unwrap();

    let mut sends = 0;
    while let Some((invite, _)) = pbx.recv_within(Duration::from_secs(1)).await {
        assert_eq!(invite.call_id().unwrap(), call_id);
        sends += 1;
    }
    assert_eq!(sends, 7);
}

#[tokio::test]
async fn test_provisional_response_stops_retransmission() {
    let pbx = FakePbx::bind().await;
    let mut cfg = config(pbx.addr());
    cfg.timers.t1_ms = 300;
    let ua = SipUserAgent::start(cfg).await.unwrap();
    ua.place_call("100", "v=0\r\n".into()).unwrap();

    let (invite, from) = pbx.recv().await;
    pbx.send(&builder::response(&invite, 100, "Trying", None), from).await;
    assert!(pbx.recv_within(Duration::from_millis(1500)).await.is_none());
}

#[tokio::test]
async fn test_inbound_call_lifecycle() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(config(pbx.addr())).await.unwrap();
    let mut events = ua.subscribe();
    let ua_addr = ua.local_addr();

    let invite = SipMessage::request(Method::Invite, format!("sip:1001@{ua_addr}"))
        .with_header("Via", format!("SIP/2.0/UDP {};branch=z9hG4bKpbx1", pbx.addr()))
        .with_header("From", "<sip:200@pbx>;tag=caller")
        .with_header("To", "<sip:1001@pbx>")
        .with_header("Call-ID", "inbound-1")
        .with_header("CSeq", "1 INVITE")
        .with_header("Contact", format!("<sip:200@{}>", pbx.addr()))
        .with_header("X-Forward-To", "<sip:+15551234@pbx>")
        .with_body("application/sdp", PBX_SDP);
    pbx.send(&invite, ua_addr).await;

    let (trying, _) = pbx.recv().await;
    assert_eq!(trying.status(), Some(100));
    match next_event(&mut events).await {
        SipEvent::IncomingCall { call_id, from, forward_to, offer, .. } => {
            assert_eq!(call_id, "inbound-1");
            assert_eq!(from, "200");
            assert_eq!(forward_to.as_deref(), Some("+15551234"));
            assert_eq!(offer.map(|o| o.port), Some(40000));
        }
        other => panic!("unexpected event {other:?}"),
    }

    ua.ring("inbound-1").unwrap();
    assert_eq!(pbx.recv().await.0.status(), Some(180));

    ua.accept_call("inbound-1", "v=0\r\n".into()).unwrap();
    let (ok, _) = pbx.recv().await;
    assert_eq!(ok.status(), Some(200));
    assert_eq!(ok.body, "v=0\r\n");
    let our_tag = ok.to_tag().unwrap().to_string();

    let ack = SipMessage::request(Method::Ack, format!("sip:1001@{ua_addr}"))
        .with_header("Via", format!("SIP/2.0/UDP {};branch=z9hG4bKpbx2", pbx.addr()))
        .with_header("From", "<sip:200@pbx>;tag=caller")
        .with_header("To", format!("<sip:1001@pbx>;tag={our_tag}"))
        .with_header("Call-ID", "inbound-1")
        .with_header("CSeq", "1 ACK");
    pbx.send(&ack, ua_addr).await;
    assert_eq!(
        next_event(&mut events).await,
        SipEvent::CallConfirmed { call_id: "inbound-1".into() }
    );

    let bye = SipMessage::request(Method::Bye, format!("sip:1001@{ua_addr}"))
        .with_header("Via", format!("SIP/2.0/UDP {};branch=z9hG4bKpbx3", pbx.addr()))
        .with_header("From", "<sip:200@pbx>;tag=caller")
        .with_header("To", format!("<sip:1001@pbx>;tag={our_tag}"))
        .with_header("Call-ID", "inbound-1")
        .with_header("CSeq", "2 BYE");
    pbx.send(&bye, ua_addr).await;
    assert_eq!(pbx.recv().await.0.status(), Some(200));
    assert!(matches!(next_event(&mut events).await, SipEvent::CallEnded { .. }));
}

#[tokio::test]
async fn test_out_of_dialog_requests() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(config(pbx.addr())).await.unwrap();
    let ua_addr = ua.local_addr();

    let request = |method: Method, call_id: &str, cseq: &str| {
        SipMessage::request(method, format!("sip:1001@{ua_addr}"))
            .with_header("Via", format!("SIP/2.0/UDP {};branch=z9hG4bK{call_id}", pbx.addr()))
            .with_header("From", "<sip:pbx@pbx>;tag=p")
            .with_header("To", "<sip:1001@pbx>")
            .with_header("Call-ID", call_id)
            .with_header("CSeq", cseq)
    };

    pbx.send(&request(Method::Options, "o1", "1 OPTIONS"), ua_addr).await;
    let (ok, _) = pbx.recv().await;
    assert_eq!(ok.status(), Some(200));
    assert!(ok.header("Allow").unwrap().contains("INVITE"));

    pbx.send(&request(Method::Bye, "gone", "5 BYE"), ua_addr).await;
    assert_eq!(pbx.recv().await.0.status(), Some(200));

    pbx.send(&request(Method::Cancel, "gone2", "5 CANCEL"), ua_addr).await;
    assert_eq!(pbx.recv().await.0.status(), Some(481));
}

fn monitored_config(server: SocketAddr) -> SipConfig {
    SipConfig {
        keepalive_interval_secs: 1,
        keepalive_miss_limit: 3,
        ..config(server)
    }
}

async fn connection_lost_within(rx: &mut mpsc::UnboundedReceiver<SipEvent>, limit: Duration) -> bool {
    let lost = async {
        while let Some(event) = rx.recv().await {
            if event == SipEvent::ConnectionLost {
                return true;
            }
        }
        false
    };
    timeout(limit, lost).await.unwrap_or(false)
}

/// Everything the PBX receives until `window` elapses, answering with `status` when set
async fn collect_for(pbx: &FakePbx, window: Duration, status: Option<u16>) -> Vec<Method> {
    let deadline = tokio::time::Instant::now() + window;
    let mut methods = Vec::new();
    while let Some((request, from)) = pbx
        .recv_within(deadline.saturating_duration_since(tokio::time::Instant::now()))
        .await
    {
        let Some(method) = request.method().cloned() else {
            continue;
        };
        if let Some(status) = status {
            pbx.send(&builder::response(&request, status, "OK", Some("srv")), from).await;
        }
        methods.push(method);
    }
    methods
}

#[tokio::test]
async fn test_silent_server_is_reported_lost() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(monitored_config(pbx.addr())).await.unwrap();
    let mut events = ua.subscribe();
    ua.start_monitor();

    assert!(connection_lost_within(&mut events, Duration::from_secs(6)).await);

    let methods = collect_for(&pbx, Duration::from_millis(300), None).await;
    let options = methods.iter().filter(|m| **m == Method::Options).count();
    assert!(options >= 2, "keepalives sent: {methods:?}");
    // losing the server triggers a fresh registration
    assert!(methods.contains(&Method::Register), "{methods:?}");
    ua.shutdown().await;
}

#[tokio::test]
async fn test_answered_keepalives_keep_connection() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(monitored_config(pbx.addr())).await.unwrap();
    let mut events = ua.subscribe();
    ua.start_monitor();

    let methods = collect_for(&pbx, Duration::from_millis(4500), Some(200)).await;
    assert!(methods.iter().filter(|m| **m == Method::Options).count() >= 3, "{methods:?}");
    assert!(!methods.contains(&Method::Register));
    while let Ok(event) = events.try_recv() {
        assert_ne!(event, SipEvent::ConnectionLost);
    }
    ua.shutdown().await;
}

#[tokio::test]
async fn test_stranger_traffic_does_not_mask_silent_server() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(monitored_config(pbx.addr())).await.unwrap();
    let ua_addr = ua.local_addr();
    let mut events = ua.subscribe();
    ua.start_monitor();

    let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let stranger_addr = stranger.local_addr().unwrap();
    let chatter = tokio::spawn(async move {
        for n in 1u32.. {
            let options = SipMessage::request(Method::Options, format!("sip:1001@{ua_addr}"))
                .with_header("Via", format!("SIP/2.0/UDP {stranger_addr};branch=z9hG4bKping{n}"))
                .with_header("From", "<sip:scanner@elsewhere>;tag=s")
                .with_header("To", "<sip:1001@elsewhere>")
                .with_header("Call-ID", format!("ping-{n}"))
                .with_header("CSeq", format!("{n} OPTIONS"));
            let _ = stranger.send_to(&options.to_bytes(), ua_addr).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    });

    assert!(connection_lost_within(&mut events, Duration::from_secs(6)).await);
    chatter.abort();
    ua.shutdown().await;
}

#[tokio::test]
async fn test_registration_is_refreshed_periodically() {
    let pbx = FakePbx::bind().await;
    let ua = SipUserAgent::start(SipConfig {
        reregister_interval_secs: 1,
        keepalive_interval_secs: 60,
        ..config(pbx.addr())
    })
    .await
    .unwrap();
    ua.start_monitor();

    let methods = collect_for(&pbx, Duration::from_millis(3500), Some(200)).await;
    let registers = methods.iter().filter(|m| **m == Method::Register).count();
    assert!(registers >= 2, "{methods:?}");
    assert_eq!(ua.registration_state(), RegistrationState::Registered);
    ua.shutdown().await;
}
