//! The SIP user agent
//!
//! [`SipUserAgent`] owns the transport, the registrar and the active
//! dialogs. A single dispatcher task consumes the transport's receive loop
//! and routes every message:
//!
//! | Message | Destination |
//! |---|---|
//! | REGISTER response | registrar |
//! | response / request with a known Call-ID | that dialog |
//! | OPTIONS outside a dialog | automatic 200 |
//! | new INVITE | new inbound dialog + [`SipEvent::IncomingCall`] |
//! | BYE for an unknown dialog | 200 anyway |
//! | CANCEL for an unknown dialog | 481 |
//! | anything else | logged and dropped |

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cellgate_rtp_core::RtpEndpoint;
use cellgate_sip_core::auth::Credentials;
use cellgate_sip_core::builder::{self, LocalIdentity, ALLOWED_METHODS};
use cellgate_sip_core::message::{header_uri, uri_user};
use cellgate_sip_core::{names, Method, SipMessage};

use crate::config::SipConfig;
use crate::dialog::{DialogAction, DialogState, SipDialog};
use crate::errors::{DialogError, DialogResult};
use crate::events::{EventSink, RegistrationState, SipEvent};
use crate::registrar::Registrar;
use crate::retransmit::Retransmitter;
use crate::stun;
use crate::transport::{Inbound, SipTransport};

/// How long a terminated dialog keeps absorbing retransmissions (64·T1)
const TERMINATED_LINGER: Duration = Duration::from_secs(32);

/// SIP user agent; cheap to clone
#[derive(Clone)]
pub struct SipUserAgent {
    inner: Arc<UserAgentInner>,
}

struct UserAgentInner {
    config: Arc<SipConfig>,
    identity: LocalIdentity,
    credentials: Credentials,
    transport: SipTransport,
    registrar: Arc<Registrar>,
    media_ip: IpAddr,
    public_addr: Option<SocketAddr>,
    dialogs: DashMap<String, SipDialog>,
    retransmitters: DashMap<String, Retransmitter>,
    events: EventSink,
    last_heard: Arc<Mutex<Instant>>,
    cancel: CancellationToken,
}

/// Local address the OS would use to reach `remote`
async fn route_source(remote: SocketAddr) -> DialogResult<IpAddr> {
    let probe = UdpSocket::bind(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 0)).await?;
    probe.connect(remote).await?;
    Ok(probe.local_addr()?.ip())
}

impl SipUserAgent {
    /// Bind, discover the public address and start routing messages
    pub async fn start(config: SipConfig) -> DialogResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let transport = SipTransport::bind(SocketAddr::new(config.bind_address, config.local_port)).await?;
        let server = tokio::net::lookup_host(config.registrar())
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| DialogError::Config(format!("cannot resolve {}", config.registrar())))?;

        let public_addr = if config.stun_enabled {
            match stun::discover(&transport.socket(), &config.stun_servers, config.stun_timeout()).await {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!(error = %e, "STUN discovery failed, advertising the local address");
                    None
                }
            }
        } else {
            None
        };

        let local_ip = if config.bind_address.is_unspecified() {
            route_source(server).await?
        } else {
            config.bind_address
        };
        let media_ip = public_addr.map_or(local_ip, |addr| addr.ip());
        let identity = LocalIdentity {
            username: config.username.clone(),
            domain: config.domain.clone(),
            display_name: config.display_name.clone(),
            host: config.advertised_host.clone().unwrap_or_else(|| media_ip.to_string()),
            port: public_addr.map_or(transport.local_addr().port(), |addr| addr.port()),
            user_agent: config.user_agent.clone(),
        };
        info!(contact = %identity.contact(), %server, "SIP user agent starting");

        let events = EventSink::new();
        let last_heard = Arc::new(Mutex::new(Instant::now()));
        let registrar = Arc::new(Registrar::new(
            config.clone(),
            identity.clone(),
            transport.clone(),
            server,
            events.clone(),
            last_heard.clone(),
        ));

        let inbound = transport.start()?;
        let agent = Self {
            inner: Arc::new(UserAgentInner {
                credentials: Credentials {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                config,
                identity,
                transport,
                registrar,
                media_ip,
                public_addr,
                dialogs: DashMap::new(),
                retransmitters: DashMap::new(),
                events,
                last_heard,
                cancel: CancellationToken::new(),
            }),
        };
        agent.spawn_dispatcher(inbound);
        Ok(agent)
    }

    fn spawn_dispatcher(&self, mut inbound: mpsc::Receiver<Inbound>) {
        let agent = self.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = agent.inner.cancel.cancelled() => break,
                    next = inbound.recv() => next,
                };
                let Some((message, source)) = next else {
                    break;
                };
                agent.dispatch(message, source);
            }
            debug!("SIP dispatcher stopped");
        });
    }

    /// Take over the event stream (one subscriber at a time)
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SipEvent> {
        self.inner.events.subscribe()
    }

    /// Address to put in SDP
    pub fn media_ip(&self) -> IpAddr {
        self.inner.media_ip
    }

    /// Public address learned through STUN
    pub fn public_addr(&self) -> Option<SocketAddr> {
        self.inner.public_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.transport.local_addr()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.inner.identity
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.inner.registrar.state()
    }

    /// One registration cycle with retries
    pub async fn register(&self) -> DialogResult<()> {
        self.inner.registrar.register().await
    }

    /// Start keepalive and periodic re-registration
    pub fn start_monitor(&self) {
        let registrar = self.inner.registrar.clone();
        let cancel = self.inner.cancel.child_token();
        tokio::spawn(registrar.monitor(cancel));
    }

    /// `sip:` URI for a number or URI
    pub fn target_uri(&self, target: &str) -> String {
        if target.starts_with("sip:") || target.starts_with("sips:") {
            target.to_string()
        } else {
            format!("sip:{target}@{}", self.inner.config.domain)
        }
    }

    /// Send an INVITE; returns the new Call-ID
    pub fn place_call(&self, target: &str, local_sdp: String) -> DialogResult<String> {
        let uri = self.target_uri(target);
        let (dialog, actions) = SipDialog::outbound(
            self.inner.identity.clone(),
            Some(self.inner.credentials.clone()),
            &uri,
            self.inner.registrar.server(),
            local_sdp,
        );
        let call_id = dialog.call_id().to_string();
        self.inner.dialogs.insert(call_id.clone(), dialog);
        self.apply(&call_id, actions);
        Ok(call_id)
    }

    fn operate<F>(&self, call_id: &str, operation: F) -> DialogResult<()>
    where
        F: FnOnce(&mut SipDialog) -> DialogResult<Vec<DialogAction>>,
    {
        let actions = self
            .inner
            .dialogs
            .get_mut(call_id)
            .map(|mut dialog| operation(dialog.value_mut()))
            .ok_or_else(|| DialogError::UnknownDialog(call_id.to_string()))??;
        self.apply(call_id, actions);
        Ok(())
    }

    /// 180 Ringing to an inbound INVITE
    pub fn ring(&self, call_id: &str) -> DialogResult<()> {
        self.operate(call_id, SipDialog::ring)
    }

    /// Answer an inbound INVITE with `local_sdp`
    pub fn accept_call(&self, call_id: &str, local_sdp: String) -> DialogResult<()> {
        self.operate(call_id, |dialog| dialog.accept(local_sdp))
    }

    /// Final error response to an inbound INVITE
    pub fn reject_call(&self, call_id: &str, status: u16, reason: &str) -> DialogResult<()> {
        self.operate(call_id, |dialog| dialog.reject(status, reason))
    }

    /// End the call whatever its state; unknown or ended calls are a no-op
    pub fn hangup(&self, call_id: &str) -> DialogResult<()> {
        match self.operate(call_id, |dialog| Ok(dialog.hangup())) {
            Err(DialogError::UnknownDialog(_)) => {
                debug!(%call_id, "hangup for unknown dialog");
                Ok(())
            }
            other => other,
        }
    }

    pub fn dialog_state(&self, call_id: &str) -> Option<DialogState> {
        self.inner.dialogs.get(call_id).map(|d| d.state())
    }

    pub fn remote_endpoint(&self, call_id: &str) -> Option<RtpEndpoint> {
        self.inner.dialogs.get(call_id).and_then(|d| d.remote_endpoint())
    }

    /// Dialogs not yet terminated
    pub fn active_calls(&self) -> usize {
        self.inner.dialogs.iter().filter(|d| !d.is_terminated()).count()
    }

    /// Hang up everything, unregister and stop all tasks
    pub async fn shutdown(&self) {
        let call_ids: Vec<String> = self.inner.dialogs.iter().map(|d| d.key().clone()).collect();
        for call_id in call_ids {
            if let Err(e) = self.hangup(&call_id) {
                debug!(%call_id, error = %e, "hangup during shutdown failed");
            }
        }
        if self.registration_state() == RegistrationState::Registered {
            if let Err(e) = self.inner.registrar.unregister().await {
                warn!(error = %e, "unregister failed");
            }
        }
        self.inner.retransmitters.clear();
        self.inner.cancel.cancel();
        self.inner.transport.close();
        info!("SIP user agent stopped");
    }

    fn apply(&self, call_id: &str, actions: Vec<DialogAction>) {
        for action in actions {
            match action {
                DialogAction::Send { message, destination } => {
                    if let Err(e) = self.inner.transport.send(&message, destination) {
                        warn!(%call_id, error = %e, "send failed");
                    }
                }
                DialogAction::StartRetransmit { message, destination } => {
                    let timer = Retransmitter::start(
                        self.inner.transport.queue(),
                        &message,
                        destination,
                        &self.inner.config.timers,
                    );
                    if let Some(previous) = self.inner.retransmitters.insert(call_id.to_string(), timer) {
                        previous.cancel();
                    }
                }
                DialogAction::CancelRetransmit => {
                    self.inner.retransmitters.remove(call_id);
                }
                DialogAction::Notify(event) => self.inner.events.publish(event),
            }
        }

        let terminated = self.inner.dialogs.get(call_id).is_some_and(|d| d.is_terminated());
        if terminated {
            self.inner.retransmitters.remove(call_id);
            self.schedule_removal(call_id);
        }
    }

    fn schedule_removal(&self, call_id: &str) {
        let agent = self.clone();
        let call_id = call_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = agent.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(TERMINATED_LINGER) => {}
            }
            if agent.inner.dialogs.remove_if(&call_id, |_, d| d.is_terminated()).is_some() {
                debug!(%call_id, "dialog removed");
            }
        });
    }

    fn reply(&self, request: &SipMessage, source: SocketAddr, status: u16, reason: &str) {
        let mut response = builder::response(request, status, reason, Some(&builder::new_tag()));
        if request.method() == Some(&Method::Options) {
            response.headers.set(names::ALLOW, ALLOWED_METHODS);
        }
        if let Err(e) = self.inner.transport.send(&response, request.response_target(source)) {
            warn!(error = %e, "reply failed");
        }
    }

    fn dispatch(&self, message: SipMessage, source: SocketAddr) {
        // only the registrar's traffic proves the PBX link is alive
        if source == self.inner.registrar.server() {
            *self.inner.last_heard.lock() = Instant::now();
        }

        let Ok(call_id) = message.call_id().map(str::to_string) else {
            debug!(%source, "dropping message without Call-ID");
            return;
        };

        if message.is_response() {
            if message.cseq_method() == Some(Method::Register) {
                self.inner.registrar.deliver(message);
                return;
            }
            let actions = self
                .inner
                .dialogs
                .get_mut(&call_id)
                .map(|mut dialog| dialog.handle_response(&message));
            match actions {
                Some(actions) => self.apply(&call_id, actions),
                None => debug!(%call_id, status = ?message.status(), "unmatched response dropped"),
            }
            return;
        }

        let Some(method) = message.method().cloned() else {
            return;
        };
        let actions = self
            .inner
            .dialogs
            .get_mut(&call_id)
            .map(|mut dialog| dialog.handle_request(&message, source));
        if let Some(actions) = actions {
            self.apply(&call_id, actions);
            return;
        }

        match method {
            Method::Invite => self.on_new_invite(call_id, message, source),
            Method::Options | Method::Bye => self.reply(&message, source, 200, "OK"),
            Method::Cancel => self.reply(&message, source, 481, "Call/Transaction Does Not Exist"),
            other => debug!(%call_id, method = %other, "unmatched request dropped"),
        }
    }

    fn on_new_invite(&self, call_id: String, invite: SipMessage, source: SocketAddr) {
        let user_of = |name: &str| {
            invite
                .header(name)
                .map(header_uri)
                .map(|uri| uri_user(uri).unwrap_or(uri).to_string())
                .unwrap_or_default()
        };
        let from = user_of(names::FROM);
        let to = user_of(names::TO);
        let forward_to = invite
            .header(&self.inner.config.forward_header)
            .map(header_uri)
            .map(|uri| uri_user(uri).unwrap_or(uri).trim().to_string())
            .filter(|number| !number.is_empty());

        let mut dialog = match SipDialog::inbound(invite.clone(), source, self.inner.identity.clone()) {
            Ok(dialog) => dialog,
            Err(e) => {
                warn!(%call_id, error = %e, "rejecting malformed INVITE");
                self.reply(&invite, source, 400, "Bad Request");
                return;
            }
        };
        let offer = dialog.remote_endpoint();
        let actions = dialog.trying();
        self.inner.dialogs.insert(call_id.clone(), dialog);
        self.apply(&call_id, actions);

        info!(%call_id, %from, %to, ?forward_to, "incoming call");
        self.inner.events.publish(SipEvent::IncomingCall {
            call_id,
            from,
            to,
            forward_to,
            offer,
        });
    }
}
