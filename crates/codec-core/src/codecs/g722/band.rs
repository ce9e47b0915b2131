//! Sub-band ADPCM state and adaptation
//!
//! Both the encoder and decoder run the identical predictor update (block 4)
//! and scale factor adaptation on the 4-bit / 2-bit core codes, which is what
//! keeps the two ends in lock-step without side information.

use super::tables::{saturate, ILB, RH2, RL42, WH, WL};

/// ADPCM state for one sub-band
#[derive(Debug, Clone)]
pub struct AdpcmBand {
    /// Signal estimate
    pub s: i32,
    /// Pole section contribution
    pub sp: i32,
    /// Zero section contribution
    pub sz: i32,
    /// Reconstructed signal history
    pub r: [i32; 3],
    /// Pole predictor coefficients
    pub a: [i32; 3],
    ap: [i32; 3],
    /// Partial reconstruction history
    pub p: [i32; 3],
    /// Quantized difference history
    pub d: [i32; 7],
    /// Zero predictor coefficients
    pub b: [i32; 7],
    bp: [i32; 7],
    sg: [i32; 7],
    /// Logarithmic scale factor
    pub nb: i32,
    /// Quantizer step size
    pub det: i32,
}

impl AdpcmBand {
    /// Fresh state with the given initial step size (32 low band, 8 high band)
    pub fn new(initial_det: i32) -> Self {
        Self {
            s: 0,
            sp: 0,
            sz: 0,
            r: [0; 3],
            a: [0; 3],
            ap: [0; 3],
            p: [0; 3],
            d: [0; 7],
            b: [0; 7],
            bp: [0; 7],
            sg: [0; 7],
            nb: 0,
            det: initial_det,
        }
    }

    /// Low-band scale factor adaptation (LOGSCL + SCALEL) from a 4-bit code
    pub fn adapt_low(&mut self, code4: i32) {
        let wd = (self.nb * 127) >> 7;
        self.nb = (wd + WL[RL42[code4 as usize] as usize]).clamp(0, 18432);
        self.det = scale(self.nb, 8);
    }

    /// High-band scale factor adaptation (LOGSCH + SCALEH) from a 2-bit code
    pub fn adapt_high(&mut self, code2: i32) {
        let wd = (self.nb * 127) >> 7;
        self.nb = (wd + WH[RH2[code2 as usize] as usize]).clamp(0, 22528);
        self.det = scale(self.nb, 10);
    }

    /// Block 4: reconstruction, pole/zero predictor update and new estimate
    pub fn update(&mut self, dx: i32) {
        // RECONS / PARREC
        self.d[0] = dx;
        self.r[0] = saturate(self.s + dx);
        self.p[0] = saturate(self.sz + dx);

        // UPPOL2
        for i in 0..3 {
            self.sg[i] = self.p[i] >> 15;
        }
        let wd1 = saturate(self.a[1] << 2);
        let mut wd2 = if self.sg[0] == self.sg[1] { -wd1 } else { wd1 };
        if wd2 > 32767 {
            wd2 = 32767;
        }
        let mut wd3 = (wd2 >> 7) + if self.sg[0] == self.sg[2] { 128 } else { -128 };
        wd3 += (self.a[2] * 32512) >> 15;
        self.ap[2] = wd3.clamp(-12288, 12288);

        // UPPOL1
        self.sg[0] = self.p[0] >> 15;
        self.sg[1] = self.p[1] >> 15;
        let wd1 = if self.sg[0] == self.sg[1] { 192 } else { -192 };
        let wd2 = (self.a[1] * 32640) >> 15;
        let limit = saturate(15360 - self.ap[2]);
        self.ap[1] = saturate(wd1 + wd2).clamp(-limit, limit);

        // UPZERO
        let step = if dx == 0 { 0 } else { 128 };
        self.sg[0] = dx >> 15;
        for i in 1..7 {
            self.sg[i] = self.d[i] >> 15;
            let wd2 = if self.sg[i] == self.sg[0] { step } else { -step };
            let wd3 = (self.b[i] * 32640) >> 15;
            self.bp[i] = saturate(wd2 + wd3);
        }

        // DELAYA
        for i in (1..7).rev() {
            self.d[i] = self.d[i - 1];
            self.b[i] = self.bp[i];
        }
        for i in (1..3).rev() {
            self.r[i] = self.r[i - 1];
            self.p[i] = self.p[i - 1];
            self.a[i] = self.ap[i];
        }

        // FILTEP
        let wd1 = (self.a[1] * saturate(self.r[1] + self.r[1])) >> 15;
        let wd2 = (self.a[2] * saturate(self.r[2] + self.r[2])) >> 15;
        self.sp = saturate(wd1 + wd2);

        // FILTEZ
        let mut sz = 0;
        for i in (1..7).rev() {
            sz += (self.b[i] * saturate(self.d[i] + self.d[i])) >> 15;
        }
        self.sz = saturate(sz);

        // PREDIC
        self.s = saturate(self.sp + self.sz);
    }
}

/// Convert a log scale factor into a linear step size
fn scale(nb: i32, shift_base: i32) -> i32 {
    let wd1 = ((nb >> 6) & 31) as usize;
    let wd2 = shift_base - (nb >> 11);
    let wd3 = if wd2 < 0 { ILB[wd1] << -wd2 } else { ILB[wd1] >> wd2 };
    wd3 << 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_step_sizes() {
        assert_eq!(AdpcmBand::new(32).det, 32);
        assert_eq!(AdpcmBand::new(8).det, 8);
    }

    #[test]
    fn test_scale_factor_stays_bounded() {
        let mut band = AdpcmBand::new(32);
        // largest multiplier over and over must saturate at the table ceiling
        for _ in 0..1000 {
            band.adapt_low(1);
        }
        assert_eq!(band.nb, 18432);
        for _ in 0..1000 {
            band.adapt_low(7);
        }
        assert_eq!(band.nb, 0);
        assert_eq!(band.det, 32);
    }

    #[test]
    fn test_zero_input_keeps_predictor_quiet() {
        let mut band = AdpcmBand::new(32);
        for _ in 0..100 {
            band.update(0);
        }
        assert_eq!(band.s, 0);
        assert_eq!(band.r, [0; 3]);
    }
}
