//! Error handling for the codec library

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised by codec operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unsupported codec type or payload type
    #[error("Unsupported codec type: {codec_type}")]
    UnsupportedCodec {
        /// Name or payload type that was requested
        codec_type: String,
    },

    /// Frame length does not fit the codec's sample grouping
    #[error("Invalid frame size: expected a multiple of {multiple_of}, got {actual}")]
    InvalidFrameSize {
        /// Required grouping
        multiple_of: usize,
        /// Supplied length
        actual: usize,
    },
}

impl CodecError {
    /// Create a new unsupported codec error
    pub fn unsupported_codec(codec_type: impl Into<String>) -> Self {
        Self::UnsupportedCodec {
            codec_type: codec_type.into(),
        }
    }
}
