//! Bridge state and the call it carries

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use cellgate_rtp_core::RtpEndpoint;

use crate::record::{CallDirection, CallRecord};
use crate::timer::TimerHandle;

/// Where the bridge is in its lifecycle
///
/// Leg A is the cellular call, leg B the SIP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeState {
    Idle,
    /// Cellular call ringing, nothing placed yet
    LegARinging,
    /// Cellular call connected, SIP call being placed
    LegAAnswered,
    /// SIP INVITE sent
    LegBCalling,
    /// SIP call ringing
    LegBRinging,
    /// Media flowing between both legs
    Bridged,
    /// Cellular call being dialed
    LegADialing,
    TearingDown,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "Idle",
            BridgeState::LegARinging => "LegARinging",
            BridgeState::LegAAnswered => "LegAAnswered",
            BridgeState::LegBCalling => "LegBCalling",
            BridgeState::LegBRinging => "LegBRinging",
            BridgeState::Bridged => "Bridged",
            BridgeState::LegADialing => "LegADialing",
            BridgeState::TearingDown => "TearingDown",
        };
        f.write_str(name)
    }
}

/// A state change as published to the subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeUpdate {
    pub state: BridgeState,
    /// Why the bridge went back to idle
    pub reason: Option<String>,
}

/// How the current call started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    /// The cellular leg rang; the gateway calls the PBX
    CellularRing,
    /// The PBX asked the gateway to dial a cellular number
    PbxForwarded,
    /// A local dial action
    LocalDial,
    /// A SIP call without forwarding, answered by the gateway itself
    DirectSip,
}

/// Media negotiation in progress
///
/// The local RTP port is reserved before any SDP goes out; the remote
/// endpoint is filled in by whichever SIP message carries the peer's SDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub local_port: u16,
    pub remote: Option<RtpEndpoint>,
}

impl Negotiation {
    pub fn new(local_port: u16) -> Self {
        Self {
            local_port,
            remote: None,
        }
    }

    pub fn with_remote(local_port: u16, remote: RtpEndpoint) -> Self {
        Self {
            local_port,
            remote: Some(remote),
        }
    }
}

/// The call the bridge is working on
#[derive(Debug, Clone)]
pub struct BridgeCall {
    pub origin: CallOrigin,
    pub remote_number: String,
    pub sip_call_id: Option<String>,
    pub negotiation: Negotiation,
    pub cellular_active: bool,
    pub sip_retries: u32,
    pub started_at: DateTime<Utc>,
    pub bridged_at: Option<DateTime<Utc>>,
    began: Instant,
}

impl BridgeCall {
    pub fn new(origin: CallOrigin, remote_number: impl Into<String>, negotiation: Negotiation) -> Self {
        Self {
            origin,
            remote_number: remote_number.into(),
            sip_call_id: None,
            negotiation,
            cellular_active: false,
            sip_retries: 0,
            started_at: Utc::now(),
            bridged_at: None,
            began: Instant::now(),
        }
    }

    pub fn direction(&self) -> CallDirection {
        match self.origin {
            CallOrigin::CellularRing | CallOrigin::DirectSip => CallDirection::Inbound,
            CallOrigin::PbxForwarded | CallOrigin::LocalDial => CallDirection::Outbound,
        }
    }

    pub fn age(&self) -> Duration {
        self.began.elapsed()
    }

    pub fn is_sip_call(&self, call_id: &str) -> bool {
        self.sip_call_id.as_deref() == Some(call_id)
    }

    pub fn into_record(self, reason: &str) -> CallRecord {
        let duration = self
            .bridged_at
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .unwrap_or_default();
        CallRecord {
            direction: self.direction(),
            remote_number: self.remote_number,
            started_at: self.started_at,
            duration,
            end_reason: reason.to_string(),
        }
    }
}

/// Everything the orchestrator guards with its lock
#[derive(Debug)]
pub struct BridgeStage {
    pub state: BridgeState,
    /// When `state` was entered
    pub(crate) state_since: Instant,
    pub call: Option<BridgeCall>,
    /// Bumped on every teardown; work scheduled for an older epoch is stale
    pub epoch: u64,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) next_timer_id: u64,
    /// Rejected competing cellular calls whose end event is still due
    pub(crate) ignored_cellular_ends: u32,
}

impl BridgeStage {
    pub fn new() -> Self {
        Self {
            state: BridgeState::Idle,
            state_since: Instant::now(),
            call: None,
            epoch: 0,
            timer: None,
            next_timer_id: 0,
            ignored_cellular_ends: 0,
        }
    }

    /// Move to `state` and restart the staleness clock
    pub fn enter(&mut self, state: BridgeState) {
        self.state = state;
        self.state_since = Instant::now();
    }

    /// How long the current state has lasted
    pub fn time_in_state(&self) -> Duration {
        self.state_since.elapsed()
    }

    /// An unbridged state held longer than `limit` no longer blocks new calls
    pub fn is_stale(&self, limit: Duration) -> bool {
        match self.state {
            BridgeState::Idle | BridgeState::Bridged => false,
            _ => self.time_in_state() > limit,
        }
    }
}

impl Default for BridgeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_direction_by_origin() {
        let call = BridgeCall::new(CallOrigin::CellularRing, "+1555", Negotiation::new(10000));
        assert_eq!(call.direction(), CallDirection::Inbound);
        let call = BridgeCall::new(CallOrigin::PbxForwarded, "+1555", Negotiation::new(10000));
        assert_eq!(call.direction(), CallDirection::Outbound);
    }

    #[test]
    fn test_record_of_unbridged_call_has_zero_duration() {
        let remote = RtpEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000, 8);
        let call = BridgeCall::new(CallOrigin::LocalDial, "+1555", Negotiation::with_remote(10000, remote));
        let record = call.into_record("cellular dial timed out");
        assert_eq!(record.duration, Duration::ZERO);
        assert_eq!(record.remote_number, "+1555");
        assert_eq!(record.end_reason, "cellular dial timed out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let mut stage = BridgeStage::new();
        assert!(!stage.is_stale(Duration::from_secs(60)));

        stage.enter(BridgeState::LegBCalling);
        stage.call = Some(BridgeCall::new(CallOrigin::CellularRing, "+1555", Negotiation::new(10000)));
        assert!(!stage.is_stale(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(stage.is_stale(Duration::from_secs(60)));

        // a fresh state resets the clock even though the call is old
        stage.enter(BridgeState::LegBRinging);
        assert!(!stage.is_stale(Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!stage.is_stale(Duration::from_secs(60)));

        stage.enter(BridgeState::Bridged);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!stage.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_display() {
        assert_eq!(BridgeState::LegBRinging.to_string(), "LegBRinging");
    }
}
