//! # cellgate-rtp-core
//!
//! RTP (RFC 3550) plumbing for the bridge media path:
//!
//! - [`packet`]: header and packet encode/decode
//! - [`sequencer`]: outbound SSRC, sequence number and timestamp bookkeeping
//! - [`endpoint`]: negotiated remote address, port and payload type
//! - [`stats`]: receive-side counters
//!
//! The crate is transport-agnostic; sockets live in the media session.

pub mod endpoint;
pub mod error;
pub mod packet;
pub mod sequencer;
pub mod stats;

pub use endpoint::RtpEndpoint;
pub use error::{Result, RtpError};
pub use packet::{RtpHeader, RtpPacket, RTP_HEADER_SIZE, RTP_VERSION};
pub use sequencer::RtpSequencer;
pub use stats::{ReceiveOutcome, RtpStats};

/// RTP synchronization source identifier
pub type RtpSsrc = u32;

/// RTP sequence number
pub type RtpSequenceNumber = u16;

/// RTP timestamp
pub type RtpTimestamp = u32;

/// RTP payload type
pub type RtpPayloadType = u8;

/// Dynamic payload type used for RFC 4733 telephone-event
pub const TELEPHONE_EVENT_PT: RtpPayloadType = 101;
