//! # cellgate-sip-core
//!
//! Text SIP for the gateway: message parsing and serialization, header
//! handling, SDP offer/answer, request/response builders and digest
//! authentication. Nothing in here touches a socket.
//!
//! ```rust
//! use cellgate_sip_core::{SipMessage, Method};
//!
//! let raw = b"OPTIONS sip:pbx.local SIP/2.0\r\nCall-ID: abc\r\nCSeq: 1 OPTIONS\r\n\r\n";
//! let msg = SipMessage::parse(raw)?;
//! assert_eq!(msg.method(), Some(&Method::Options));
//! assert_eq!(msg.call_id()?, "abc");
//! # Ok::<(), cellgate_sip_core::SipError>(())
//! ```

pub mod auth;
pub mod builder;
pub mod error;
pub mod headers;
pub mod message;
pub mod sdp;

pub use auth::{AuthChallenge, ChallengeKind, Credentials};
pub use builder::{DialogParams, LocalIdentity};
pub use error::{Result, SipError};
pub use headers::{names, Headers};
pub use message::{CSeq, Method, SipMessage, StartLine};
pub use sdp::SessionDescription;
