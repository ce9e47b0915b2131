//! Codec implementations and factory

use crate::error::{CodecError, Result};
use crate::types::{AudioCodec, CodecType};
use tracing::debug;

#[cfg(feature = "g711")]
pub mod g711;

#[cfg(feature = "g722")]
pub mod g722;

/// Codec factory for creating per-stream codec instances
pub struct CodecFactory;

impl CodecFactory {
    /// Create a codec instance for the given type
    pub fn create(codec_type: CodecType) -> Result<Box<dyn AudioCodec>> {
        debug!(codec = %codec_type, "creating codec instance");
        match codec_type {
            #[cfg(feature = "g711")]
            CodecType::G711Pcmu => Ok(Box::new(g711::G711Codec::pcmu())),

            #[cfg(feature = "g711")]
            CodecType::G711Pcma => Ok(Box::new(g711::G711Codec::pcma())),

            #[cfg(feature = "g722")]
            CodecType::G722 => Ok(Box::new(g722::G722Codec::new())),

            #[allow(unreachable_patterns)]
            other => Err(CodecError::unsupported_codec(format!(
                "{} (not enabled in build features)",
                other.name()
            ))),
        }
    }

    /// Create a codec by RTP payload type
    pub fn create_by_payload_type(payload_type: u8) -> Result<Box<dyn AudioCodec>> {
        Self::create(CodecType::from_payload_type(payload_type)?)
    }
}
