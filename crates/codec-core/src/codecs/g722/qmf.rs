//! G.722 QMF (Quadrature Mirror Filter) analysis and synthesis
//!
//! The transmit filter splits 16 kHz audio into an 8 kHz low band and an
//! 8 kHz high band; the receive filter recombines them. Both keep a 24-sample
//! delay line that is shifted by two samples per call.

use super::tables::{saturate, QMF_COEFFS};

/// QMF delay line for one direction
#[derive(Debug, Clone, Default)]
pub struct QmfFilter {
    x: [i32; 24],
}

impl QmfFilter {
    /// Create a zeroed filter
    pub fn new() -> Self {
        Self::default()
    }

    fn push_pair(&mut self, first: i32, second: i32) {
        self.x.copy_within(2..24, 0);
        self.x[22] = first;
        self.x[23] = second;
    }

    /// Transmit QMF: two input samples in, one (low, high) sub-band pair out
    pub fn analysis(&mut self, xin0: i16, xin1: i16) -> (i32, i32) {
        self.push_pair(i32::from(xin0), i32::from(xin1));

        let mut sum_odd = 0i32;
        let mut sum_even = 0i32;
        for i in 0..12 {
            sum_odd += self.x[2 * i] * QMF_COEFFS[i];
            sum_even += self.x[2 * i + 1] * QMF_COEFFS[11 - i];
        }

        let xlow = (sum_even + sum_odd) >> 14;
        let xhigh = (sum_even - sum_odd) >> 14;
        (xlow, xhigh)
    }

    /// Receive QMF: one (low, high) sub-band pair in, two output samples out
    pub fn synthesis(&mut self, rlow: i32, rhigh: i32) -> (i16, i16) {
        self.push_pair(rlow + rhigh, rlow - rhigh);

        let mut xout1 = 0i32;
        let mut xout2 = 0i32;
        for i in 0..12 {
            xout2 += self.x[2 * i] * QMF_COEFFS[i];
            xout1 += self.x[2 * i + 1] * QMF_COEFFS[11 - i];
        }

        (saturate(xout1 >> 11) as i16, saturate(xout2 >> 11) as i16)
    }

    /// Clear the delay line
    pub fn reset(&mut self) {
        self.x = [0; 24];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_line_shift() {
        let mut qmf = QmfFilter::new();
        qmf.analysis(100, 200);
        qmf.analysis(300, 400);
        assert_eq!(&qmf.x[20..24], &[100, 200, 300, 400]);
    }

    #[test]
    fn test_silence_in_silence_out() {
        let mut qmf = QmfFilter::new();
        for _ in 0..50 {
            assert_eq!(qmf.analysis(0, 0), (0, 0));
            assert_eq!(qmf.synthesis(0, 0), (0, 0));
        }
    }

    #[test]
    fn test_dc_lands_in_low_band() {
        let mut qmf = QmfFilter::new();
        let mut last = (0, 0);
        for _ in 0..40 {
            last = qmf.analysis(8000, 8000);
        }
        assert!(last.0.abs() > 10 * last.1.abs().max(1), "low={} high={}", last.0, last.1);
    }
}
