//! # cellgate-codec-core
//!
//! Audio codecs used by the bridge media path.
//!
//! - **G.711 (PCMU/PCMA)**: ITU-T μ-law and A-law companding
//! - **G.722**: 64 kbit/s sub-band ADPCM wideband codec (16 kHz audio)
//! - **Resampling**: 8 kHz ↔ 16 kHz conversion between the narrowband
//!   codecs and wideband devices
//!
//! Every codec instance is stateful per stream: create one encoder and one
//! decoder per RTP direction and never share them between calls.
//!
//! ```rust
//! use cellgate_codec_core::{CodecFactory, CodecType};
//!
//! let mut codec = CodecFactory::create(CodecType::G711Pcma)?;
//! let samples = vec![0i16; 160]; // 20ms at 8kHz
//! let encoded = codec.encode(&samples)?;
//! let decoded = codec.decode(&encoded)?;
//! assert_eq!(decoded.len(), 160);
//! # Ok::<(), cellgate_codec_core::CodecError>(())
//! ```

#![warn(missing_docs)]

pub mod codecs;
pub mod error;
pub mod resample;
pub mod types;

pub use codecs::CodecFactory;
pub use error::{CodecError, Result};
pub use resample::{Downsampler, Upsampler};
pub use types::{AudioCodec, CodecInfo, CodecType, FRAME_DURATION_MS};

/// Version information for the codec library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
