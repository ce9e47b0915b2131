//! # cellgate-media-core
//!
//! The audio path of a bridged call: one RTP stream on one UDP socket,
//! transcoded to and from a PCM16 device pair.
//!
//! ```text
//!   RTP in ──► receive ──► JitterBuffer ──► playback ──► decode ─► resample ─► AudioSink
//!   RTP out ◄── send ◄── encode ◄── resample ◄── EchoGate ◄── capture ◄──── AudioSource
//! ```
//!
//! A session is started with [`MediaSession::start`] once the remote
//! [`RtpEndpoint`](cellgate_rtp_core::RtpEndpoint) is known and stopped
//! synchronously with [`MediaSession::stop`].

pub mod audio;
pub mod config;
pub mod echo;
pub mod error;
pub mod jitter;
pub mod session;

pub use audio::{AudioSink, AudioSource, QueueSource, RecordingSink};
pub use config::{EchoConfig, MediaConfig};
pub use echo::{EchoGate, GateDecision};
pub use error::{MediaError, Result};
pub use jitter::{JitterBuffer, JitterStats};
pub use session::{bind_rtp_socket, MediaEvent, MediaSession, FRAME_INTERVAL};
