//! G.711 μ-law (PCMU) and A-law (PCMA) companding
//!
//! Segment arithmetic follows ITU-T G.711 as implemented in the ITU-T
//! Software Tools Library, so encoded bytes are interoperable with every
//! PBX and carrier gateway.

use crate::error::Result;
use crate::types::{AudioCodec, CodecInfo, CodecType};

/// Compress one linear sample to A-law
pub fn alaw_encode(sample: i16) -> u8 {
    let sample = i32::from(sample);
    // one's complement magnitude, 12 significant bits
    let mut ix = if sample < 0 { (!sample) >> 4 } else { sample >> 4 };

    if ix > 15 {
        let mut iexp = 1;
        while ix > 16 + 15 {
            ix >>= 1;
            iexp += 1;
        }
        ix -= 16;
        ix += iexp << 4;
    }

    if sample >= 0 {
        ix |= 0x80;
    }

    (ix ^ 0x55) as u8
}

/// Expand one A-law byte to a linear sample
pub fn alaw_decode(encoded: u8) -> i16 {
    let ix = i32::from(encoded ^ 0x55) & 0x7F;
    let iexp = ix >> 4;
    let mut mant = ix & 0x0F;

    if iexp > 0 {
        mant += 16;
    }
    mant = (mant << 4) + 0x08;
    if iexp > 1 {
        mant <<= iexp - 1;
    }

    if encoded > 127 {
        mant as i16
    } else {
        -mant as i16
    }
}

/// Compress one linear sample to μ-law
pub fn ulaw_encode(sample: i16) -> u8 {
    let sample = i32::from(sample);
    let absno = if sample < 0 {
        ((!sample) >> 2) + 33
    } else {
        (sample >> 2) + 33
    }
    .min(0x1FFF);

    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x08 - segno;
    let low_nibble = 0x0F - ((absno >> segno) & 0x0F);
    let mut out = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        out |= 0x80;
    }
    out as u8
}

/// Expand one μ-law byte to a linear sample
pub fn ulaw_decode(encoded: u8) -> i16 {
    let sign = if encoded < 0x80 { -1 } else { 1 };
    let mantissa = i32::from(!encoded);
    let exponent = (mantissa >> 4) & 0x07;
    let segment = exponent + 1;
    let mantissa = mantissa & 0x0F;
    let step = 4 << segment;

    (sign * ((0x80 << exponent) + step * mantissa + step / 2 - 4 * 33)) as i16
}

/// Stateless G.711 codec (the law is the only state)
#[derive(Debug, Clone, Copy)]
pub struct G711Codec {
    codec_type: CodecType,
}

impl G711Codec {
    /// μ-law codec
    pub fn pcmu() -> Self {
        Self { codec_type: CodecType::G711Pcmu }
    }

    /// A-law codec
    pub fn pcma() -> Self {
        Self { codec_type: CodecType::G711Pcma }
    }

    fn is_alaw(&self) -> bool {
        self.codec_type == CodecType::G711Pcma
    }
}

impl AudioCodec for G711Codec {
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        let out = if self.is_alaw() {
            samples.iter().map(|&s| alaw_encode(s)).collect()
        } else {
            samples.iter().map(|&s| ulaw_encode(s)).collect()
        };
        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        let out = if self.is_alaw() {
            data.iter().map(|&b| alaw_decode(b)).collect()
        } else {
            data.iter().map(|&b| ulaw_decode(b)).collect()
        };
        Ok(out)
    }

    fn info(&self) -> CodecInfo {
        self.codec_type.info()
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alaw_known_values() {
        // silence encodes to the classic 0xD5 idle pattern
        assert_eq!(alaw_encode(0), 0xD5);
        assert_eq!(alaw_decode(0xD5), 8);
        assert_eq!(alaw_decode(0x55), -8);
    }

    #[test]
    fn test_ulaw_known_values() {
        assert_eq!(ulaw_encode(0), 0xFF);
        assert_eq!(ulaw_decode(0xFF), 0);
        assert_eq!(ulaw_decode(0x7F), 0);
    }

    #[test]
    fn test_companding_error_is_bounded() {
        for sample in (-32768i32..=32767).step_by(97) {
            let sample = sample as i16;
            let a = alaw_decode(alaw_encode(sample));
            let u = ulaw_decode(ulaw_encode(sample));
            // quantization step is at most 1/16 of the magnitude plus a floor
            let bound = (i32::from(sample).abs() / 16).max(16) + 16;
            assert!((i32::from(a) - i32::from(sample)).abs() <= bound, "A-law {sample} -> {a}");
            assert!((i32::from(u) - i32::from(sample)).abs() <= bound, "u-law {sample} -> {u}");
        }
    }

    #[test]
    fn test_decode_is_sign_symmetric() {
        for byte in 0u8..=127 {
            assert_eq!(alaw_decode(byte), -alaw_decode(byte | 0x80));
            assert_eq!(ulaw_decode(byte), -ulaw_decode(byte | 0x80));
        }
    }

    #[test]
    fn test_codec_frame() {
        let mut codec = G711Codec::pcma();
        let pcm: Vec<i16> = (0..160).map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16).collect();
        let encoded = codec.encode(&pcm).unwrap();
        assert_eq!(encoded.len(), 160);
        assert_eq!(codec.decode(&encoded).unwrap().len(), 160);
    }
}
