//! # cellgate-call-engine
//!
//! Drives one cellular call and one SIP call into a single bridged audio
//! path. The [`BridgeOrchestrator`] is the only writer of [`BridgeState`];
//! its collaborators arrive through an explicit [`GatewayContext`]:
//!
//! - [`SipLeg`]: the SIP user agent (implemented for
//!   [`SipUserAgent`](cellgate_dialog_core::SipUserAgent))
//! - [`CellularLeg`]: the host platform's cellular call control
//! - [`MediaControl`]: the RTP media path (implemented by [`RtpMedia`])
//! - [`CallRecordSink`]: receives a [`CallRecord`] per finished call

pub mod adapters;
pub mod cellular;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod record;
pub mod state;
pub mod timer;

pub use adapters::{MediaControl, RtpMedia, SipLeg};
pub use cellular::{CellularCallState, CellularEvent, CellularLeg};
pub use config::BridgeConfig;
pub use context::GatewayContext;
pub use error::{BridgeError, Result};
pub use orchestrator::BridgeOrchestrator;
pub use record::{CallDirection, CallRecord, CallRecordSink, LogRecordSink, MemoryRecordSink};
pub use state::{BridgeCall, BridgeState, BridgeUpdate, CallOrigin, Negotiation};
