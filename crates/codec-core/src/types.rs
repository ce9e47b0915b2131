//! Core types and traits for the codec library

use crate::error::{CodecError, Result};
use std::fmt;

/// Packetization interval used throughout the bridge
pub const FRAME_DURATION_MS: u32 = 20;

/// Primary trait for audio codecs
///
/// Implementations keep per-stream state (ADPCM predictors, filter delay
/// lines), so one instance must only ever see one direction of one stream.
pub trait AudioCodec: Send {
    /// Encode 16-bit PCM samples at [`CodecInfo::sample_rate`]
    ///
    /// # Errors
    ///
    /// Returns an error if the frame length does not fit the codec
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>>;

    /// Decode a payload into 16-bit PCM samples at [`CodecInfo::sample_rate`]
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;

    /// Get codec information
    fn info(&self) -> CodecInfo;

    /// Reset codec state for a stream discontinuity
    fn reset(&mut self);

    /// Samples per 20 ms frame at the codec's audio sample rate
    fn frame_size(&self) -> usize {
        self.info().frame_size
    }
}

/// Audio codec information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Codec name as used in SDP rtpmap lines
    pub name: &'static str,
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// RTP clock rate in Hz (8000 for G.722 per RFC 3551)
    pub clock_rate: u32,
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Frame size in samples (20 ms)
    pub frame_size: usize,
    /// RTP payload type
    pub payload_type: u8,
}

/// Audio codec types supported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// G.711 μ-law (PCMU)
    G711Pcmu,
    /// G.711 A-law (PCMA)
    G711Pcma,
    /// G.722 wideband
    G722,
}

impl CodecType {
    /// Static RTP payload type (RFC 3551)
    pub fn payload_type(self) -> u8 {
        match self {
            Self::G711Pcmu => 0,
            Self::G711Pcma => 8,
            Self::G722 => 9,
        }
    }

    /// Look a codec up by its static payload type
    pub fn from_payload_type(payload_type: u8) -> Result<Self> {
        match payload_type {
            0 => Ok(Self::G711Pcmu),
            8 => Ok(Self::G711Pcma),
            9 => Ok(Self::G722),
            other => Err(CodecError::unsupported_codec(format!("PT{other}"))),
        }
    }

    /// SDP encoding name
    pub fn name(self) -> &'static str {
        match self {
            Self::G711Pcmu => "PCMU",
            Self::G711Pcma => "PCMA",
            Self::G722 => "G722",
        }
    }

    /// Audio sample rate the codec consumes and produces
    pub fn sample_rate(self) -> u32 {
        match self {
            Self::G711Pcmu | Self::G711Pcma => 8000,
            Self::G722 => 16000,
        }
    }

    /// RTP timestamp clock rate. G.722 keeps 8000 for historical reasons.
    pub fn clock_rate(self) -> u32 {
        8000
    }

    /// Samples per 20 ms frame at [`Self::sample_rate`]
    pub fn frame_samples(self) -> usize {
        (self.sample_rate() * FRAME_DURATION_MS / 1000) as usize
    }

    /// RTP timestamp increment per 20 ms frame
    pub fn timestamp_step(self) -> u32 {
        self.clock_rate() * FRAME_DURATION_MS / 1000
    }

    /// Encoded payload size of one 20 ms frame (all three run at 64 kbit/s)
    pub fn payload_bytes(self) -> usize {
        160
    }

    /// Codec information
    pub fn info(self) -> CodecInfo {
        CodecInfo {
            name: self.name(),
            sample_rate: self.sample_rate(),
            clock_rate: self.clock_rate(),
            bitrate: 64_000,
            frame_size: self.frame_samples(),
            payload_type: self.payload_type(),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
