//! The SIP and media seams of the orchestrator and their real implementations

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;

use cellgate_dialog_core::SipUserAgent;
use cellgate_media_core::{bind_rtp_socket, AudioSink, AudioSource, MediaConfig, MediaEvent, MediaSession};
use cellgate_rtp_core::RtpEndpoint;
use cellgate_sip_core::sdp;

use crate::error::Result;

/// What the orchestrator needs from the SIP user agent
#[async_trait]
pub trait SipLeg: Send + Sync {
    /// Send an INVITE offering media on `local_port`; returns the Call-ID
    async fn place_call(&self, target: &str, local_port: u16) -> Result<String>;

    /// 180 Ringing to an inbound INVITE
    async fn ring(&self, call_id: &str) -> Result<()>;

    /// 200 OK to an inbound INVITE, answering with `payload_type` on `local_port`
    async fn accept_call(&self, call_id: &str, local_port: u16, payload_type: u8) -> Result<()>;

    /// Final error response to an inbound INVITE
    async fn reject_call(&self, call_id: &str, status: u16, reason: &str) -> Result<()>;

    /// End a call in whatever state; unknown or ended calls are a no-op
    async fn hangup(&self, call_id: &str) -> Result<()>;
}

/// What the orchestrator needs from the media path
#[async_trait]
pub trait MediaControl: Send + Sync {
    /// Reserve a local RTP port for the next session
    async fn prepare(&self) -> Result<u16>;

    /// Start streaming to `remote` on the reserved port
    async fn start(&self, remote: RtpEndpoint) -> Result<mpsc::UnboundedReceiver<MediaEvent>>;

    /// Stop the running session and release the reserved port; idempotent
    fn stop(&self);
}

fn session_id() -> u64 {
    u64::from(rand::random::<u32>())
}

#[async_trait]
impl SipLeg for SipUserAgent {
    async fn place_call(&self, target: &str, local_port: u16) -> Result<String> {
        let offer = sdp::build_offer(self.media_ip(), local_port, session_id());
        Ok(SipUserAgent::place_call(self, target, offer)?)
    }

    async fn ring(&self, call_id: &str) -> Result<()> {
        Ok(SipUserAgent::ring(self, call_id)?)
    }

    async fn accept_call(&self, call_id: &str, local_port: u16, payload_type: u8) -> Result<()> {
        let answer = sdp::build_answer(self.media_ip(), local_port, session_id(), payload_type);
        Ok(SipUserAgent::accept_call(self, call_id, answer)?)
    }

    async fn reject_call(&self, call_id: &str, status: u16, reason: &str) -> Result<()> {
        Ok(SipUserAgent::reject_call(self, call_id, status, reason)?)
    }

    async fn hangup(&self, call_id: &str) -> Result<()> {
        Ok(SipUserAgent::hangup(self, call_id)?)
    }
}

/// [`MediaControl`] over real RTP sessions and a device pair
pub struct RtpMedia {
    config: MediaConfig,
    source: Arc<dyn AudioSource>,
    sink: Arc<dyn AudioSink>,
    reserved: Mutex<Option<UdpSocket>>,
    session: Mutex<Option<MediaSession>>,
}

impl RtpMedia {
    pub fn new(config: MediaConfig, source: Arc<dyn AudioSource>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            config,
            source,
            sink,
            reserved: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().as_ref().is_some_and(|s| !s.is_stopped())
    }
}

#[async_trait]
impl MediaControl for RtpMedia {
    async fn prepare(&self) -> Result<u16> {
        let socket = bind_rtp_socket(&self.config).await?;
        let port = socket.local_addr().map_err(cellgate_media_core::MediaError::from)?.port();
        *self.reserved.lock() = Some(socket);
        Ok(port)
    }

    async fn start(&self, remote: RtpEndpoint) -> Result<mpsc::UnboundedReceiver<MediaEvent>> {
        let reserved = self.reserved.lock().take();
        let socket = match reserved {
            Some(socket) => socket,
            None => bind_rtp_socket(&self.config).await?,
        };
        let (session, events) = MediaSession::start(
            socket,
            remote,
            self.source.clone(),
            self.sink.clone(),
            &self.config,
        )
        .await?;
        if let Some(previous) = self.session.lock().replace(session) {
            previous.stop();
        }
        Ok(events)
    }

    fn stop(&self) {
        if self.reserved.lock().take().is_some() {
            debug!("released reserved RTP port");
        }
        if let Some(session) = self.session.lock().take() {
            session.stop();
        }
    }
}
