//! Error types for media-core

use thiserror::Error;

use cellgate_codec_core::CodecError;
use cellgate_rtp_core::RtpError;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Errors raised while setting up or running a media session
#[derive(Error, Debug)]
pub enum MediaError {
    /// Every port in the configured RTP range is taken
    #[error("No free RTP port in {min}-{max}")]
    NoRtpPort { min: u16, max: u16 },

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec creation or coding failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Malformed RTP
    #[error("RTP error: {0}")]
    Rtp(#[from] RtpError),

    /// Device and codec rates cannot be bridged
    #[error("Unsupported sample rate conversion {from} Hz -> {to} Hz")]
    UnsupportedSampleRate { from: u32, to: u32 },

    /// Audio device failure reported by an I/O implementation
    #[error("Audio error: {0}")]
    Audio(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
