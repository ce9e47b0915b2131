//! The cellular side of the bridge
//!
//! Call control on the cellular network belongs to the host platform. The
//! orchestrator only sees the events below and drives the leg through
//! [`CellularLeg`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cellular call states as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellularCallState {
    Idle,
    Ringing,
    Dialing,
    Alerting,
    Active,
    Holding,
    Disconnected,
}

/// Events from the cellular leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellularEvent {
    /// A cellular call is ringing; it has not been answered
    IncomingCall { number: String },
    /// The current cellular call connected
    CallActive,
    /// Any other state change, informational
    CallStateChanged(CellularCallState),
    /// The current cellular call ended
    CallEnded,
}

/// Operations on the cellular leg
#[async_trait]
pub trait CellularLeg: Send + Sync {
    /// Answer the ringing call
    async fn answer(&self) -> Result<()>;

    /// Decline the ringing call
    async fn reject(&self) -> Result<()>;

    /// Place a call to `number`
    async fn dial(&self, number: &str) -> Result<()>;

    /// End the current call in whatever state it is
    async fn disconnect(&self) -> Result<()>;
}
