//! G.722 encoder/decoder at 64 kbit/s
//!
//! Each octet carries one 6-bit low-band code and one 2-bit high-band code
//! for a pair of 16 kHz input samples, so a 20 ms frame is 320 samples in and
//! 160 octets out.

use super::band::AdpcmBand;
use super::qmf::QmfFilter;
use super::tables::{saturate, IHN, IHP, ILN, ILP, Q6, QM2, QM4, QM6};
use crate::error::{CodecError, Result};
use crate::types::{AudioCodec, CodecInfo, CodecType};

/// G.722 encoder state for one stream
#[derive(Debug, Clone)]
pub struct G722Encoder {
    qmf: QmfFilter,
    low: AdpcmBand,
    high: AdpcmBand,
}

impl Default for G722Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl G722Encoder {
    /// Fresh encoder
    pub fn new() -> Self {
        Self {
            qmf: QmfFilter::new(),
            low: AdpcmBand::new(32),
            high: AdpcmBand::new(8),
        }
    }

    /// Encode one pair of 16 kHz samples into a single octet
    pub fn encode_pair(&mut self, xin0: i16, xin1: i16) -> u8 {
        let (xlow, xhigh) = self.qmf.analysis(xin0, xin1);

        // Block 1L: SUBTRA + QUANTL
        let el = saturate(xlow - self.low.s);
        let wd = if el >= 0 { el } else { -(el + 1) };
        let mut i = 1;
        while i < 30 {
            let decision = (Q6[i] * self.low.det) >> 12;
            if wd < decision {
                break;
            }
            i += 1;
        }
        let ilow = if el < 0 { ILN[i] } else { ILP[i] };

        // Block 2L: INVQAL on the 4-bit core, then adapt
        let ril = ilow >> 2;
        let dlow = (self.low.det * QM4[ril as usize]) >> 15;
        self.low.adapt_low(ril);
        self.low.update(dlow);

        // Block 1H: SUBTRA + QUANTH
        let eh = saturate(xhigh - self.high.s);
        let wd = if eh >= 0 { eh } else { -(eh + 1) };
        let decision = (564 * self.high.det) >> 12;
        let mih = if wd >= decision { 2 } else { 1 };
        let ihigh = if eh < 0 { IHN[mih] } else { IHP[mih] };

        // Block 2H: INVQAH, then adapt
        let dhigh = (self.high.det * QM2[ihigh as usize]) >> 15;
        self.high.adapt_high(ihigh);
        self.high.update(dhigh);

        ((ihigh << 6) | ilow) as u8
    }

    /// Reset to the initial state
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// G.722 decoder state for one stream
#[derive(Debug, Clone)]
pub struct G722Decoder {
    qmf: QmfFilter,
    low: AdpcmBand,
    high: AdpcmBand,
}

impl Default for G722Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl G722Decoder {
    /// Fresh decoder
    pub fn new() -> Self {
        Self {
            qmf: QmfFilter::new(),
            low: AdpcmBand::new(32),
            high: AdpcmBand::new(8),
        }
    }

    /// Decode a single octet into a pair of 16 kHz samples
    pub fn decode_octet(&mut self, code: u8) -> (i16, i16) {
        let ilr = i32::from(code & 0x3F);
        let ihigh = i32::from(code >> 6);

        // Block 5L: INVQBL + RECONS + LIMIT on the full 6-bit code
        let wd2 = (self.low.det * QM6[ilr as usize]) >> 15;
        let rlow = (self.low.s + wd2).clamp(-16384, 16383);

        // Block 2L: INVQAL on the 4-bit core keeps the predictor in step
        let core = ilr >> 2;
        let dlow = (self.low.det * QM4[core as usize]) >> 15;
        self.low.adapt_low(core);
        self.low.update(dlow);

        // High band
        let dhigh = (self.high.det * QM2[ihigh as usize]) >> 15;
        let rhigh = (dhigh + self.high.s).clamp(-16384, 16383);
        self.high.adapt_high(ihigh);
        self.high.update(dhigh);

        self.qmf.synthesis(rlow, rhigh)
    }

    /// Reset to the initial state
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Stream codec wrapping one encoder and one decoder
#[derive(Debug, Clone, Default)]
pub struct G722Codec {
    encoder: G722Encoder,
    decoder: G722Decoder,
}

impl G722Codec {
    /// Fresh codec
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCodec for G722Codec {
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        if samples.len() % 2 != 0 {
            return Err(CodecError::InvalidFrameSize {
                multiple_of: 2,
                actual: samples.len(),
            });
        }
        Ok(samples
            .chunks_exact(2)
            .map(|pair| self.encoder.encode_pair(pair[0], pair[1]))
            .collect())
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        let mut out = Vec::with_capacity(data.len() * 2);
        for &octet in data {
            let (a, b) = self.decoder.decode_octet(octet);
            out.push(a);
            out.push(b);
        }
        Ok(out)
    }

    fn info(&self) -> CodecInfo {
        CodecType::G722.info()
    }

    fn reset(&mut self) {
        self.encoder.reset();
        self.decoder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let mut codec = G722Codec::new();
        let encoded = codec.encode(&vec![0i16; 320]).unwrap();
        assert_eq!(encoded.len(), 160);
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 320);
    }

    #[test]
    fn test_odd_frame_rejected() {
        let mut codec = G722Codec::new();
        assert!(matches!(
            codec.encode(&[0i16; 3]),
            Err(CodecError::InvalidFrameSize { actual: 3, .. })
        ));
    }

    #[test]
    fn test_silence_decodes_near_zero() {
        let mut codec = G722Codec::new();
        let encoded = codec.encode(&vec![0i16; 640]).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert!(decoded.iter().all(|s| s.abs() < 64), "{:?}", &decoded[..16]);
    }

    #[test]
    fn test_encoder_and_decoder_track_each_other() {
        let mut enc = G722Encoder::new();
        let mut dec = G722Decoder::new();
        for n in 0..800 {
            let x = ((n as f32 * 0.3).sin() * 6000.0) as i16;
            let code = enc.encode_pair(x, x);
            dec.decode_octet(code);
            assert_eq!(enc.low.det, dec.low.det);
            assert_eq!(enc.low.s, dec.low.s);
            assert_eq!(enc.high.s, dec.high.s);
        }
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut codec = G722Codec::new();
        let tone: Vec<i16> = (0..320).map(|n| ((n as f32 * 0.2).sin() * 9000.0) as i16).collect();
        let first = codec.encode(&tone).unwrap();
        codec.encode(&tone).unwrap();
        codec.reset();
        assert_eq!(codec.encode(&tone).unwrap(), first);
    }
}
