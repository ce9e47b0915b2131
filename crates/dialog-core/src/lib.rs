//! # cellgate-dialog-core
//!
//! The SIP user agent of the gateway: a UDP transport with a single reader
//! and a single writer, registration with digest authentication and
//! keepalive monitoring, per-call INVITE dialogs with Timer A
//! retransmission, and STUN discovery of the public address.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐   IncomingCall / CallAnswered / ...
//!            │ SipUserAgent │ ─────────────────────────────────────► subscriber
//!            └──────┬───────┘
//!     dispatch      │       DialogAction
//!   ┌───────────────┼──────────────────┐
//!   ▼               ▼                  ▼
//! Registrar     SipDialog (pure)   Retransmitter
//!   │               │                  │
//!   └───────────────┴──► SipTransport ◄┘
//! ```
//!
//! [`dialog::SipDialog`] is a pure state machine: it consumes messages and
//! returns [`dialog::DialogAction`]s, which the user agent executes.

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod manager;
pub mod registrar;
pub mod retransmit;
pub mod stun;
pub mod transport;

pub use config::{SipConfig, TimerSettings};
pub use dialog::{DialogAction, DialogState, Direction, SipDialog};
pub use errors::{DialogError, DialogResult};
pub use events::{EventSink, RegistrationState, SipEvent};
pub use manager::SipUserAgent;
pub use transport::SipTransport;
