//! UDP transport for SIP
//!
//! One socket, one writer task draining a send queue, and one receive loop
//! that is the only reader of the socket. Datagrams that do not parse as
//! SIP are logged and dropped.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use cellgate_sip_core::SipMessage;

use crate::errors::{DialogError, DialogResult};

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 65_535;

/// Capacity of the parsed-message channel towards the dispatcher
const INBOUND_CAPACITY: usize = 256;

/// Serialized datagram and its destination
pub type Outbound = (Bytes, SocketAddr);

/// Handle for queueing datagrams on the writer task
pub type OutboundQueue = mpsc::UnboundedSender<Outbound>;

/// Parsed message and the address it came from
pub type Inbound = (SipMessage, SocketAddr);

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct SipTransport {
    inner: Arc<SipTransportInner>,
}

struct SipTransportInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    queue: OutboundQueue,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    cancel: CancellationToken,
}

impl SipTransport {
    /// Bind the socket; nothing runs until [`SipTransport::start`]
    pub async fn bind(addr: SocketAddr) -> DialogResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let (queue, pending) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(SipTransportInner {
                socket: Arc::new(socket),
                local_addr,
                queue,
                pending: Mutex::new(Some(pending)),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// The raw socket, for exchanges that must happen before the receive
    /// loop owns it (STUN discovery)
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.inner.socket.clone()
    }

    /// Queue for raw datagrams, used by retransmission timers
    pub fn queue(&self) -> OutboundQueue {
        self.inner.queue.clone()
    }

    /// Spawn the writer and the receive loop; returns the inbound message
    /// stream. Only the first call succeeds.
    pub fn start(&self) -> DialogResult<mpsc::Receiver<Inbound>> {
        let pending = self
            .inner
            .pending
            .lock()
            .take()
            .ok_or(DialogError::TransportClosed)?;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        self.spawn_writer(pending);
        self.spawn_receive_loop(inbound_tx);
        Ok(inbound_rx)
    }

    fn spawn_writer(&self, mut pending: mpsc::UnboundedReceiver<Outbound>) {
        let socket = self.inner.socket.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = pending.recv() => next,
                };
                let Some((datagram, destination)) = next else {
                    break;
                };
                if let Err(e) = socket.send_to(&datagram, destination).await {
                    // transient; the retransmission timers cover the loss
                    warn!(%destination, error = %e, "SIP send failed");
                }
            }
            debug!("SIP writer terminated");
        });
    }

    fn spawn_receive_loop(&self, inbound: mpsc::Sender<Inbound>) {
        let socket = self.inner.socket.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                let (len, source) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP unreachable surfaces here on some platforms
                        debug!(error = %e, "error receiving UDP packet");
                        continue;
                    }
                };
                if len <= 4 && buf[..len].iter().all(|b| b.is_ascii_whitespace()) {
                    trace!(%source, "keepalive datagram");
                    continue;
                }
                match SipMessage::parse(&buf[..len]) {
                    Ok(message) => {
                        trace!(%source, "received SIP message:\n{}", message);
                        if inbound.send((message, source)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%source, error = %e, "dropping unparsable datagram"),
                }
            }
            info!("SIP receive loop terminated");
        });
    }

    /// Queue a message for sending
    pub fn send(&self, message: &SipMessage, destination: SocketAddr) -> DialogResult<()> {
        if self.is_closed() {
            return Err(DialogError::TransportClosed);
        }
        debug!(%destination, "sending {}", summary(message));
        trace!("outgoing SIP message:\n{}", message);
        self.inner
            .queue
            .send((Bytes::from(message.to_bytes()), destination))
            .map_err(|_| DialogError::TransportClosed)
    }

    /// Stop both tasks
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

fn summary(message: &SipMessage) -> String {
    match (message.method(), message.status()) {
        (Some(method), _) => method.to_string(),
        (None, Some(status)) => format!("{status} {}", message.reason().unwrap_or_default()),
        (None, None) => "message".to_string(),
    }
}

impl fmt::Debug for SipTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SipTransport({})", self.inner.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgate_sip_core::Method;
    use std::time::Duration;

    #[tokio::test]
    async fn test_round_trip_between_transports() {
        let a = SipTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = SipTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let _a_rx = a.start().unwrap();
        let mut b_rx = b.start().unwrap();
        assert!(b.start().is_err());

        let options = SipMessage::request(Method::Options, "sip:x@127.0.0.1")
            .with_header("Call-ID", "t1")
            .with_header("CSeq", "1 OPTIONS");
        a.send(&options, b.local_addr()).unwrap();

        let (message, source) = tokio::time::timeout(Duration::from_secs(2), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.call_id().unwrap(), "t1");
        assert_eq!(source, a.local_addr());
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let t = SipTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut rx = t.start().unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"\r\n\r\n", t.local_addr()).await.unwrap();
        raw.send_to(b"hello there", t.local_addr()).await.unwrap();
        raw.send_to(b"OPTIONS sip:a SIP/2.0\r\nCall-ID: ok\r\nCSeq: 2 OPTIONS\r\n\r\n", t.local_addr())
            .await
            .unwrap();
        let (message, _) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.call_id().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let t = SipTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        t.close();
        let msg = SipMessage::response(200, "OK");
        assert!(matches!(t.send(&msg, t.local_addr()), Err(DialogError::TransportClosed)));
    }
}
