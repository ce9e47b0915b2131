//! # Bridge orchestrator
//!
//! Ties one cellular call and one SIP dialog into a bridge. Events from both
//! legs, timer expiries and media signals all funnel into handlers that take
//! the single stage lock, so every transition of [`BridgeState`] is
//! serialized.
//!
//! ## Flows
//!
//! ```text
//! cellular rings      Idle ─► LegBCalling ─► LegBRinging ─► (SIP 200: answer cellular)
//!                                                          ─► (cellular active) ─► Bridged
//!
//! PBX forwards        Idle ─► LegADialing ─► (cellular active: 200 OK) ─► Bridged
//!
//! local dial          Idle ─► LegADialing ─► LegAAnswered ─► (SIP 200) ─► Bridged
//!
//! direct SIP call     Idle ─► (200 OK) ─► Bridged
//!
//! any failure         * ─► TearingDown ─► Idle
//! ```
//!
//! Timer callbacks and media events that arrive after the stage moved on
//! find a different timer id or epoch and do nothing.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cellgate_dialog_core::SipEvent;
use cellgate_media_core::MediaEvent;
use cellgate_rtp_core::RtpEndpoint;

use crate::cellular::{CellularCallState, CellularEvent};
use crate::context::GatewayContext;
use crate::error::{BridgeError, Result};
use crate::state::{BridgeCall, BridgeStage, BridgeState, BridgeUpdate, CallOrigin, Negotiation};
use crate::timer::{TimerHandle, TimerKind};

struct Inner {
    ctx: GatewayContext,
    stage: tokio::sync::Mutex<BridgeStage>,
    updates: Mutex<Option<mpsc::UnboundedSender<BridgeUpdate>>>,
}

/// The bridge state machine
#[derive(Clone)]
pub struct BridgeOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BridgeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeOrchestrator")
            .field("ctx", &self.inner.ctx)
            .finish_non_exhaustive()
    }
}

impl BridgeOrchestrator {
    pub fn new(ctx: GatewayContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                stage: tokio::sync::Mutex::new(BridgeStage::new()),
                updates: Mutex::new(None),
            }),
        }
    }

    /// Receive state changes; a new subscriber replaces the previous one
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.updates.lock() = Some(tx);
        rx
    }

    pub async fn state(&self) -> BridgeState {
        self.inner.stage.lock().await.state
    }

    /// Snapshot of the call in progress
    pub async fn current_call(&self) -> Option<BridgeCall> {
        self.inner.stage.lock().await.call.clone()
    }

    pub fn context(&self) -> &GatewayContext {
        &self.inner.ctx
    }

    /// Feed events from both legs until `cancel` fires or both streams end
    pub async fn run(
        self,
        mut sip_events: mpsc::UnboundedReceiver<SipEvent>,
        mut cellular_events: mpsc::UnboundedReceiver<CellularEvent>,
        cancel: CancellationToken,
    ) {
        let mut sip_open = true;
        let mut cellular_open = true;
        while sip_open || cellular_open {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = sip_events.recv(), if sip_open => match event {
                    Some(event) => self.handle_sip(event).await,
                    None => sip_open = false,
                },
                event = cellular_events.recv(), if cellular_open => match event {
                    Some(event) => self.handle_cellular(event).await,
                    None => cellular_open = false,
                },
            }
        }
        self.teardown("gateway stopping").await;
        info!("bridge orchestrator stopped");
    }

    /// Dial a cellular number and bridge it to the PBX once connected
    pub async fn dial(&self, number: &str) -> Result<()> {
        let mut stage = self.inner.stage.lock().await;
        if !self.admit(&mut stage).await {
            return Err(BridgeError::Busy {
                state: stage.state.to_string(),
            });
        }
        let local_port = self.inner.ctx.media.prepare().await?;
        stage.call = Some(BridgeCall::new(CallOrigin::LocalDial, number, Negotiation::new(local_port)));
        self.transition(&mut stage, BridgeState::LegADialing, None);
        if let Err(e) = self.inner.ctx.cellular.dial(number).await {
            self.teardown_locked(&mut stage, &format!("cellular dial failed: {e}")).await;
            return Err(e);
        }
        self.arm(&mut stage, TimerKind::CellularDial);
        Ok(())
    }

    /// End the current bridge, if any
    pub async fn hangup(&self) {
        self.teardown("local hangup").await;
    }

    /// Tear down both legs and media; a no-op when already idle
    pub async fn teardown(&self, reason: &str) {
        let mut stage = self.inner.stage.lock().await;
        self.teardown_locked(&mut stage, reason).await;
    }

    pub async fn handle_cellular(&self, event: CellularEvent) {
        debug!(?event, "cellular event");
        let mut stage = self.inner.stage.lock().await;
        match event {
            CellularEvent::IncomingCall { number } => self.on_cellular_ring(&mut stage, number).await,
            CellularEvent::CallActive => self.on_cellular_active(&mut stage).await,
            CellularEvent::CallStateChanged(CellularCallState::Disconnected) | CellularEvent::CallEnded => {
                if stage.ignored_cellular_ends > 0 {
                    stage.ignored_cellular_ends -= 1;
                    debug!("end of a rejected cellular call");
                    return;
                }
                self.teardown_locked(&mut stage, "cellular call ended").await;
            }
            CellularEvent::CallStateChanged(state) => {
                debug!(?state, bridge = %stage.state, "cellular state changed");
            }
        }
    }

    pub async fn handle_sip(&self, event: SipEvent) {
        let mut stage = self.inner.stage.lock().await;
        match event {
            SipEvent::Registration(state) => info!(?state, "SIP registration"),
            SipEvent::ConnectionLost => {
                warn!("SIP server unreachable, user agent is re-registering");
            }
            SipEvent::IncomingCall {
                call_id,
                from,
                forward_to,
                offer,
                ..
            } => {
                self.on_sip_incoming(&mut stage, call_id, from, forward_to, offer)
                    .await
            }
            SipEvent::CallRinging { call_id } => {
                if Self::owns(&stage, &call_id) && stage.state == BridgeState::LegBCalling {
                    self.transition(&mut stage, BridgeState::LegBRinging, None);
                }
            }
            SipEvent::CallAnswered { call_id, endpoint } => {
                if Self::owns(&stage, &call_id) {
                    self.on_sip_answered(&mut stage, endpoint).await;
                }
            }
            SipEvent::CallConfirmed { call_id } => debug!(%call_id, "SIP call confirmed"),
            SipEvent::CallFailed {
                call_id,
                status,
                reason,
            } => {
                if Self::owns(&stage, &call_id) {
                    info!(%call_id, status, %reason, "SIP call failed");
                    self.on_sip_gone(&mut stage, format!("SIP call failed: {status} {reason}"))
                        .await;
                }
            }
            SipEvent::CallEnded { call_id, reason } => {
                if Self::owns(&stage, &call_id) {
                    info!(%call_id, %reason, "SIP call ended");
                    self.on_sip_gone(&mut stage, "SIP call ended".to_string()).await;
                }
            }
        }
    }

    async fn handle_media(&self, event: MediaEvent, epoch: u64) {
        let mut stage = self.inner.stage.lock().await;
        if stage.epoch != epoch || stage.state != BridgeState::Bridged {
            return;
        }
        match event {
            MediaEvent::RemoteLatched(addr) => debug!(%addr, "media latched"),
            MediaEvent::InactivityTimeout => {
                self.teardown_locked(&mut stage, "no RTP received").await;
            }
        }
    }

    async fn on_timer(&self, id: u64) {
        let mut stage = self.inner.stage.lock().await;
        let Some(kind) = stage.timer.as_ref().filter(|t| t.id() == id).map(|t| t.kind()) else {
            return;
        };
        stage.timer = None;
        warn!(?kind, state = %stage.state, "bridge timer expired");
        self.teardown_locked(&mut stage, kind.reason()).await;
    }

    fn owns(stage: &BridgeStage, call_id: &str) -> bool {
        let owned = stage.call.as_ref().is_some_and(|c| c.is_sip_call(call_id));
        if !owned {
            debug!(%call_id, "event for a SIP call that is not bridged");
        }
        owned
    }

    fn publish(&self, update: BridgeUpdate) {
        if let Some(tx) = self.inner.updates.lock().as_ref() {
            let _ = tx.send(update);
        }
    }

    fn transition(&self, stage: &mut BridgeStage, state: BridgeState, reason: Option<&str>) {
        if stage.state == state {
            return;
        }
        info!(from = %stage.state, to = %state, "bridge state");
        stage.enter(state);
        self.publish(BridgeUpdate {
            state,
            reason: reason.map(str::to_string),
        });
    }

    fn arm(&self, stage: &mut BridgeStage, kind: TimerKind) {
        let config = &self.inner.ctx.config;
        let delay = match kind {
            TimerKind::SipAnswer => config.sip_call_timeout(),
            TimerKind::CellularDial | TimerKind::CellularAnswer => config.cellular_dial_timeout(),
        };
        stage.next_timer_id += 1;
        let id = stage.next_timer_id;
        let this = self.clone();
        stage.timer = Some(TimerHandle::spawn(id, kind, delay, async move {
            this.on_timer(id).await;
        }));
    }

    /// Whether a new call may start, resetting a stale bridge first
    async fn admit(&self, stage: &mut BridgeStage) -> bool {
        if stage.state == BridgeState::Idle {
            return true;
        }
        if stage.is_stale(self.inner.ctx.config.stale_after()) {
            warn!(state = %stage.state, "bridge state is stale, forcing reset");
            self.teardown_locked(stage, "stale state reset").await;
            return true;
        }
        false
    }

    async fn on_cellular_ring(&self, stage: &mut BridgeStage, number: String) {
        let ctx = &self.inner.ctx;
        if !self.admit(stage).await {
            info!(%number, state = %stage.state, "busy, rejecting cellular call");
            stage.ignored_cellular_ends += 1;
            if let Err(e) = ctx.cellular.reject().await {
                warn!(error = %e, "cellular reject failed");
            }
            return;
        }

        let local_port = match ctx.media.prepare().await {
            Ok(port) => port,
            Err(e) => {
                error!(error = %e, "no media for cellular call, rejecting");
                if let Err(e) = ctx.cellular.reject().await {
                    warn!(error = %e, "cellular reject failed");
                }
                return;
            }
        };
        info!(%number, local_port, "cellular call ringing, calling PBX");
        stage.call = Some(BridgeCall::new(CallOrigin::CellularRing, number, Negotiation::new(local_port)));
        self.place_sip_call(stage).await;
    }

    /// Send the INVITE for the current call
    async fn place_sip_call(&self, stage: &mut BridgeStage) {
        let ctx = &self.inner.ctx;
        let Some(call) = stage.call.as_mut() else {
            return;
        };
        call.sip_call_id = None;
        call.negotiation.remote = None;
        let local_port = call.negotiation.local_port;
        let origin = call.origin;

        if origin == CallOrigin::CellularRing {
            self.transition(stage, BridgeState::LegBCalling, None);
        }
        match ctx.sip.place_call(&ctx.config.sip_target, local_port).await {
            Ok(call_id) => {
                debug!(%call_id, "SIP call placed");
                if let Some(call) = stage.call.as_mut() {
                    call.sip_call_id = Some(call_id);
                }
                self.arm(stage, TimerKind::SipAnswer);
            }
            Err(e) => {
                self.teardown_locked(stage, &format!("SIP call failed: {e}")).await;
            }
        }
    }

    async fn on_cellular_active(&self, stage: &mut BridgeStage) {
        let ctx = &self.inner.ctx;
        let state = stage.state;
        let Some(call) = stage.call.as_mut() else {
            debug!("cellular active with no bridge");
            return;
        };
        call.cellular_active = true;
        let origin = call.origin;
        let negotiation = call.negotiation;
        let sip_call_id = call.sip_call_id.clone();

        match (state, origin) {
            (BridgeState::LegBCalling | BridgeState::LegBRinging, CallOrigin::CellularRing) => {
                match negotiation.remote {
                    Some(remote) => self.start_media(stage, remote).await,
                    None => debug!("cellular answered before the PBX"),
                }
            }
            (BridgeState::LegADialing, CallOrigin::PbxForwarded) => {
                stage.timer = None;
                let (Some(call_id), Some(remote)) = (sip_call_id, negotiation.remote) else {
                    self.teardown_locked(stage, "no SIP call to accept").await;
                    return;
                };
                if let Err(e) = ctx
                    .sip
                    .accept_call(&call_id, negotiation.local_port, remote.payload_type)
                    .await
                {
                    self.teardown_locked(stage, &format!("SIP accept failed: {e}")).await;
                    return;
                }
                self.start_media(stage, remote).await;
            }
            (BridgeState::LegADialing, CallOrigin::LocalDial) => {
                stage.timer = None;
                self.transition(stage, BridgeState::LegAAnswered, None);
                self.place_sip_call(stage).await;
            }
            _ => debug!(%state, ?origin, "cellular active ignored"),
        }
    }

    async fn on_sip_incoming(
        &self,
        stage: &mut BridgeStage,
        call_id: String,
        from: String,
        forward_to: Option<String>,
        offer: Option<RtpEndpoint>,
    ) {
        let ctx = &self.inner.ctx;
        let reject = |status: u16, reason: &'static str| {
            let sip = ctx.sip.clone();
            let call_id = call_id.clone();
            async move {
                if let Err(e) = sip.reject_call(&call_id, status, reason).await {
                    warn!(%call_id, error = %e, "SIP reject failed");
                }
            }
        };

        if !self.admit(stage).await {
            info!(%call_id, state = %stage.state, "busy, rejecting SIP call");
            reject(486, "Busy Here").await;
            return;
        }
        let Some(offer) = offer else {
            warn!(%call_id, "SIP call without a usable offer");
            reject(488, "Not Acceptable Here").await;
            return;
        };
        let local_port = match ctx.media.prepare().await {
            Ok(port) => port,
            Err(e) => {
                error!(%call_id, error = %e, "no media for SIP call");
                reject(503, "Service Unavailable").await;
                return;
            }
        };

        let negotiation = Negotiation::with_remote(local_port, offer);
        match forward_to {
            Some(number) => {
                info!(%call_id, %number, "PBX forwarding, dialing cellular");
                let mut call = BridgeCall::new(CallOrigin::PbxForwarded, number.clone(), negotiation);
                call.sip_call_id = Some(call_id.clone());
                stage.call = Some(call);
                self.transition(stage, BridgeState::LegADialing, None);
                if let Err(e) = ctx.sip.ring(&call_id).await {
                    warn!(%call_id, error = %e, "180 Ringing failed");
                }
                if let Err(e) = ctx.cellular.dial(&number).await {
                    self.teardown_locked(stage, &format!("cellular dial failed: {e}")).await;
                    return;
                }
                self.arm(stage, TimerKind::CellularDial);
            }
            None => {
                info!(%call_id, %from, "SIP call without forwarding, answering");
                let mut call = BridgeCall::new(CallOrigin::DirectSip, from, negotiation);
                call.sip_call_id = Some(call_id.clone());
                stage.call = Some(call);
                if let Err(e) = ctx.sip.accept_call(&call_id, local_port, offer.payload_type).await {
                    self.teardown_locked(stage, &format!("SIP accept failed: {e}")).await;
                    return;
                }
                self.start_media(stage, offer).await;
            }
        }
    }

    async fn on_sip_answered(&self, stage: &mut BridgeStage, endpoint: RtpEndpoint) {
        let ctx = &self.inner.ctx;
        let state = stage.state;
        let Some(call) = stage.call.as_mut() else {
            return;
        };
        call.negotiation.remote = Some(endpoint);
        let origin = call.origin;
        let cellular_active = call.cellular_active;
        stage.timer = None;

        match (state, origin) {
            (BridgeState::LegBCalling | BridgeState::LegBRinging, CallOrigin::CellularRing) => {
                if cellular_active {
                    self.start_media(stage, endpoint).await;
                    return;
                }
                info!(%endpoint, "PBX answered, answering cellular call");
                if let Err(e) = ctx.cellular.answer().await {
                    self.teardown_locked(stage, &format!("cellular answer failed: {e}")).await;
                    return;
                }
                self.arm(stage, TimerKind::CellularAnswer);
            }
            (BridgeState::LegAAnswered, CallOrigin::LocalDial) => {
                self.start_media(stage, endpoint).await;
            }
            _ => debug!(%state, ?origin, "SIP answer ignored"),
        }
    }

    /// The SIP call failed or ended
    async fn on_sip_gone(&self, stage: &mut BridgeStage, reason: String) {
        let limit = self.inner.ctx.config.sip_retry_limit;
        let ringing = matches!(stage.state, BridgeState::LegBCalling | BridgeState::LegBRinging);
        let retry = match stage.call.as_mut() {
            Some(call)
                if ringing
                    && call.origin == CallOrigin::CellularRing
                    && !call.cellular_active
                    && call.negotiation.remote.is_none() =>
            {
                if call.sip_retries < limit {
                    call.sip_retries += 1;
                    info!(attempt = call.sip_retries, limit, "retrying SIP call");
                    Some(true)
                } else {
                    Some(false)
                }
            }
            _ => None,
        };

        match retry {
            Some(true) => self.place_sip_call(stage).await,
            Some(false) => self.teardown_locked(stage, "SIP call ended").await,
            None => self.teardown_locked(stage, &reason).await,
        }
    }

    async fn start_media(&self, stage: &mut BridgeStage, remote: RtpEndpoint) {
        let ctx = &self.inner.ctx;
        stage.timer = None;
        match ctx.media.start(remote).await {
            Ok(mut events) => {
                if let Some(call) = stage.call.as_mut() {
                    call.bridged_at = Some(Utc::now());
                }
                self.transition(stage, BridgeState::Bridged, None);
                let epoch = stage.epoch;
                let this = self.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        this.handle_media(event, epoch).await;
                    }
                });
            }
            Err(e) => {
                self.teardown_locked(stage, &format!("media failed: {e}")).await;
            }
        }
    }

    async fn teardown_locked(&self, stage: &mut BridgeStage, reason: &str) {
        if stage.state == BridgeState::TearingDown
            || (stage.state == BridgeState::Idle && stage.call.is_none())
        {
            debug!(reason, "nothing to tear down");
            return;
        }
        info!(reason, state = %stage.state, "tearing down bridge");
        let ctx = &self.inner.ctx;
        self.transition(stage, BridgeState::TearingDown, None);
        stage.timer = None;
        ctx.media.stop();

        let call = stage.call.take();
        if let Some(call_id) = call.as_ref().and_then(|c| c.sip_call_id.as_deref()) {
            if let Err(e) = ctx.sip.hangup(call_id).await {
                warn!(%call_id, error = %e, "SIP hangup failed");
            }
        }
        if let Err(e) = ctx.cellular.disconnect().await {
            warn!(error = %e, "cellular disconnect failed");
        }
        if let Some(call) = call {
            ctx.records.record(call.into_record(reason));
        }

        stage.epoch += 1;
        stage.ignored_cellular_ends = 0;
        self.transition(stage, BridgeState::Idle, Some(reason));
    }
}
