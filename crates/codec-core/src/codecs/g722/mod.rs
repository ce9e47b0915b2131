//! G.722 Wideband Audio Codec Implementation
//!
//! 64 kbit/s sub-band ADPCM according to ITU-T Recommendation G.722.
//!
//! - `codec`: encoder, decoder and the [`AudioCodec`](crate::AudioCodec) wrapper
//! - `qmf`: QMF analysis and synthesis filters
//! - `band`: per-band ADPCM predictor and scale factor adaptation
//! - `tables`: quantization tables and constants

pub mod band;
pub mod codec;
pub mod qmf;
pub mod tables;

pub use codec::{G722Codec, G722Decoder, G722Encoder};
