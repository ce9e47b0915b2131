use thiserror::Error;

/// Error type for RTP packet handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtpError {
    /// Buffer ended before the structure it was supposed to hold
    #[error("Buffer too small: need {required} but have {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Only RTP version 2 is understood
    #[error("Invalid RTP version: {0}")]
    InvalidVersion(u8),

    /// Header fields that contradict each other or the buffer
    #[error("Invalid RTP packet: {0}")]
    InvalidPacket(String),
}

/// Result type for RTP operations
pub type Result<T> = std::result::Result<T, RtpError>;
