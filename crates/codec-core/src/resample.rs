//! 8 kHz ↔ 16 kHz sample rate conversion
//!
//! Both directions share one windowed-sinc half-band low-pass filter. The
//! filters keep their delay line between calls, so a stream must always be
//! fed through the same instance frame after frame.

const HALF_BAND_TAPS: usize = 31;

#[derive(Debug, Clone)]
struct HalfBandFilter {
    taps: Vec<f32>,
    history: Vec<f32>,
    pos: usize,
}

impl HalfBandFilter {
    fn new(gain: f32) -> Self {
        let center = (HALF_BAND_TAPS / 2) as f32;
        let mut taps: Vec<f32> = (0..HALF_BAND_TAPS)
            .map(|k| {
                let n = k as f32 - center;
                let sinc = if n == 0.0 {
                    1.0
                } else {
                    let x = std::f32::consts::PI * n / 2.0;
                    x.sin() / x
                };
                let window = 0.54
                    - 0.46 * (2.0 * std::f32::consts::PI * k as f32 / (HALF_BAND_TAPS - 1) as f32).cos();
                sinc * window
            })
            .collect();
        let sum: f32 = taps.iter().sum();
        for tap in &mut taps {
            *tap *= gain / sum;
        }
        Self {
            taps,
            history: vec![0.0; HALF_BAND_TAPS],
            pos: 0,
        }
    }

    fn push(&mut self, sample: f32) {
        self.history[self.pos] = sample;
        self.pos = (self.pos + 1) % HALF_BAND_TAPS;
    }

    fn output(&self) -> f32 {
        // oldest sample sits at `pos`
        self.taps
            .iter()
            .enumerate()
            .map(|(k, tap)| tap * self.history[(self.pos + k) % HALF_BAND_TAPS])
            .sum()
    }

    fn reset(&mut self) {
        self.history.iter_mut().for_each(|h| *h = 0.0);
        self.pos = 0;
    }
}

fn to_i16(value: f32) -> i16 {
    value.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Doubles the sample rate (8 kHz → 16 kHz)
#[derive(Debug, Clone)]
pub struct Upsampler {
    filter: HalfBandFilter,
}

impl Default for Upsampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Upsampler {
    /// Create a new upsampler
    pub fn new() -> Self {
        // zero stuffing halves the energy, the filter gain restores it
        Self { filter: HalfBandFilter::new(2.0) }
    }

    /// Convert a block; output is exactly twice as long as the input
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(input.len() * 2);
        for &sample in input {
            self.filter.push(f32::from(sample));
            out.push(to_i16(self.filter.output()));
            self.filter.push(0.0);
            out.push(to_i16(self.filter.output()));
        }
        out
    }

    /// Clear the delay line
    pub fn reset(&mut self) {
        self.filter.reset();
    }
}

/// Halves the sample rate (16 kHz → 8 kHz)
#[derive(Debug, Clone)]
pub struct Downsampler {
    filter: HalfBandFilter,
    odd_phase: bool,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Downsampler {
    /// Create a new downsampler
    pub fn new() -> Self {
        Self {
            filter: HalfBandFilter::new(1.0),
            odd_phase: false,
        }
    }

    /// Convert a block; odd-length input carries its phase into the next call
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(input.len() / 2 + 1);
        for &sample in input {
            self.filter.push(f32::from(sample));
            if !self.odd_phase {
                out.push(to_i16(self.filter.output()));
            }
            self.odd_phase = !self.odd_phase;
        }
        out
    }

    /// Clear the delay line
    pub fn reset(&mut self) {
        self.filter.reset();
        self.odd_phase = false;
    }
}
