//! Registration lifecycle and connection monitoring
//!
//! REGISTER responses are routed here by the dispatcher through a channel;
//! everything else about the registrar binding (Call-ID, From tag, CSeq)
//! stays constant for the lifetime of the user agent as RFC 3261 §10.2
//! recommends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cellgate_sip_core::auth::{self, AuthChallenge, Credentials};
use cellgate_sip_core::builder::{self, LocalIdentity};
use cellgate_sip_core::{Method, SipMessage};

use crate::config::SipConfig;
use crate::errors::{DialogError, DialogResult};
use crate::events::{EventSink, RegistrationState, SipEvent};
use crate::transport::SipTransport;

const RESPONSE_QUEUE: usize = 32;

pub struct Registrar {
    config: Arc<SipConfig>,
    identity: LocalIdentity,
    credentials: Credentials,
    transport: SipTransport,
    server: SocketAddr,
    events: EventSink,
    call_id: String,
    from_tag: String,
    cseq: AtomicU32,
    keepalive_call_id: String,
    keepalive_cseq: AtomicU32,
    responses_tx: mpsc::Sender<SipMessage>,
    /// Held for the whole of one registration cycle, which also keeps
    /// cycles from interleaving
    responses: AsyncMutex<mpsc::Receiver<SipMessage>>,
    state: RwLock<RegistrationState>,
    last_heard: Arc<Mutex<Instant>>,
}

impl Registrar {
    pub fn new(
        config: Arc<SipConfig>,
        identity: LocalIdentity,
        transport: SipTransport,
        server: SocketAddr,
        events: EventSink,
        last_heard: Arc<Mutex<Instant>>,
    ) -> Self {
        let (responses_tx, responses) = mpsc::channel(RESPONSE_QUEUE);
        let credentials = Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
        };
        Self {
            call_id: builder::new_call_id(&identity.host),
            keepalive_call_id: builder::new_call_id(&identity.host),
            from_tag: builder::new_tag(),
            config,
            identity,
            credentials,
            transport,
            server,
            events,
            cseq: AtomicU32::new(0),
            keepalive_cseq: AtomicU32::new(0),
            responses_tx,
            responses: AsyncMutex::new(responses),
            state: RwLock::new(RegistrationState::Unregistered),
            last_heard,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state.read().clone()
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    fn set_state(&self, state: RegistrationState) {
        let changed = {
            let mut current = self.state.write();
            let changed = *current != state;
            *current = state.clone();
            changed
        };
        if changed {
            self.events.publish(SipEvent::Registration(state));
        }
    }

    /// Hand over a REGISTER response from the receive path; never blocks
    pub fn deliver(&self, response: SipMessage) {
        if self.responses_tx.try_send(response).is_err() {
            debug!("registrar not waiting, REGISTER response dropped");
        }
    }

    /// Register (or refresh) with retries
    pub async fn register(&self) -> DialogResult<()> {
        let mut responses = self.responses.lock().await;
        self.set_state(RegistrationState::Registering);

        let attempts = self.config.register_attempts;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.attempt(&mut responses, self.config.register_expires_secs).await {
                Ok(()) => {
                    info!(server = %self.server, "registered");
                    self.set_state(RegistrationState::Registered);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "registration attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.register_retry_delay()).await;
            }
        }
        self.set_state(RegistrationState::Failed(last_error.clone()));
        Err(DialogError::RegistrationFailed(last_error))
    }

    /// Remove the binding; a single attempt
    pub async fn unregister(&self) -> DialogResult<()> {
        let mut responses = self.responses.lock().await;
        let result = self.attempt(&mut responses, 0).await;
        self.set_state(RegistrationState::Unregistered);
        result
    }

    /// One REGISTER transaction, answering at most one challenge
    async fn attempt(&self, responses: &mut mpsc::Receiver<SipMessage>, expires: u32) -> DialogResult<()> {
        while responses.try_recv().is_ok() {}

        let mut authorization = None;
        loop {
            let cseq = self.cseq.fetch_add(1, Ordering::Relaxed) + 1;
            let request = builder::register(
                &self.identity,
                &self.call_id,
                cseq,
                &self.from_tag,
                &builder::new_branch(),
                expires,
                authorization.as_ref(),
            );
            self.transport.send(&request, self.server)?;

            let response = self.final_response(responses, cseq).await?;
            let status = response.status().unwrap_or_default();
            match status {
                200..=299 => return Ok(()),
                401 | 407 if authorization.is_none() => {
                    let challenge = AuthChallenge::from_response(&response)?;
                    debug!(realm = %challenge.realm, "REGISTER challenged");
                    authorization = Some(auth::authorization(
                        &self.credentials,
                        &challenge,
                        &Method::Register,
                        &self.identity.registrar_uri(),
                    ));
                }
                _ => {
                    return Err(DialogError::RegistrationFailed(format!(
                        "{status} {}",
                        response.reason().unwrap_or_default()
                    )))
                }
            }
        }
    }

    async fn final_response(&self, responses: &mut mpsc::Receiver<SipMessage>, cseq: u32) -> DialogResult<SipMessage> {
        let deadline = tokio::time::Instant::now() + self.config.register_timeout();
        loop {
            let response = tokio::time::timeout_at(deadline, responses.recv())
                .await
                .map_err(|_| {
                    DialogError::RegistrationFailed(format!(
                        "no response within {}s",
                        self.config.register_timeout_secs
                    ))
                })?
                .ok_or(DialogError::TransportClosed)?;
            let matches = response.cseq().is_ok_and(|c| c.seq == cseq);
            if matches && response.status().is_some_and(|s| s >= 200) {
                return Ok(response);
            }
        }
    }

    fn send_keepalive(&self) {
        let cseq = self.keepalive_cseq.fetch_add(1, Ordering::Relaxed) + 1;
        let options = builder::options(
            &self.identity,
            &self.identity.registrar_uri(),
            &self.keepalive_call_id,
            cseq,
            &self.from_tag,
            &builder::new_branch(),
        );
        if let Err(e) = self.transport.send(&options, self.server) {
            warn!(error = %e, "keepalive send failed");
        }
    }

    /// Keepalive and periodic re-registration until `cancel` fires
    pub async fn monitor(self: Arc<Self>, cancel: CancellationToken) {
        let keepalive_every = self.config.keepalive_interval();
        let silence_limit = keepalive_every * self.config.keepalive_miss_limit;
        let reregister_every = self.config.reregister_interval();

        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + keepalive_every, keepalive_every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reregister =
            tokio::time::interval_at(tokio::time::Instant::now() + reregister_every, reregister_every);
        reregister.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(?keepalive_every, ?reregister_every, "registration monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = keepalive.tick() => {
                    let silence = self.last_heard.lock().elapsed();
                    if silence >= silence_limit {
                        warn!(?silence, "server silent, connection lost");
                        self.events.publish(SipEvent::ConnectionLost);
                        *self.last_heard.lock() = Instant::now();
                        if let Err(e) = self.register().await {
                            warn!(error = %e, "re-registration after connection loss failed");
                        }
                    } else {
                        self.send_keepalive();
                    }
                }
                _ = reregister.tick() => {
                    if let Err(e) = self.register().await {
                        warn!(error = %e, "periodic re-registration failed");
                    }
                }
            }
        }
        debug!("registration monitor stopped");
    }
}
