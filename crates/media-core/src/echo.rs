//! Echo and double-talk gate
//!
//! A loudness gate rather than a canceller. Playback loudness is tracked as
//! a decaying reference; while the far end is talking, capture that is no
//! louder than the learned echo ratio predicts is treated as echo and
//! muted, and capture well above the prediction is near-end speech and
//! passes. Muted frames are the ones the ratio learns from.

use crate::config::EchoConfig;

/// Outcome for one capture frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No far-end activity; capture passes
    Forward,
    /// Near-end speech over far-end speech; capture passes
    DoubleTalk,
    /// Capture explained by playback leakage; muted
    SuppressEcho,
    /// Capture below the noise floor; muted
    SuppressNoise,
}

impl GateDecision {
    pub fn passes(self) -> bool {
        matches!(self, Self::Forward | Self::DoubleTalk)
    }
}

/// Per-session gate state
#[derive(Debug, Clone)]
pub struct EchoGate {
    config: EchoConfig,
    reference: f32,
    echo_ratio: f32,
}

impl EchoGate {
    pub fn new(config: EchoConfig) -> Self {
        let echo_ratio = config
            .initial_echo_ratio
            .clamp(config.min_echo_ratio, config.max_echo_ratio);
        Self {
            config,
            reference: 0.0,
            echo_ratio,
        }
    }

    /// Feed the RMS of a frame just written to playback
    pub fn observe_playback(&mut self, playback_rms: f32) {
        self.reference = playback_rms.max(self.reference * self.config.reference_decay);
    }

    /// Decide whether a capture frame with the given RMS goes out
    pub fn gate(&mut self, capture_rms: f32) -> GateDecision {
        if capture_rms < self.config.noise_floor {
            return GateDecision::SuppressNoise;
        }
        if !self.config.enabled || self.reference < self.config.reference_threshold {
            return GateDecision::Forward;
        }

        let predicted = self.echo_ratio * self.reference;
        if capture_rms > self.config.double_talk_margin * predicted {
            return GateDecision::DoubleTalk;
        }

        let observed = (capture_rms / self.reference)
            .clamp(self.config.min_echo_ratio, self.config.max_echo_ratio);
        let alpha = self.config.ratio_smoothing;
        self.echo_ratio = (1.0 - alpha) * self.echo_ratio + alpha * observed;
        GateDecision::SuppressEcho
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    pub fn echo_ratio(&self) -> f32 {
        self.echo_ratio
    }

    pub fn reset(&mut self) {
        self.reference = 0.0;
        self.echo_ratio = self
            .config
            .initial_echo_ratio
            .clamp(self.config.min_echo_ratio, self.config.max_echo_ratio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> EchoGate {
        EchoGate::new(EchoConfig::default())
    }

    #[test]
    fn test_noise_floor_always_suppressed() {
        let mut g = gate();
        assert_eq!(g.gate(50.0), GateDecision::SuppressNoise);
        g.observe_playback(5000.0);
        assert_eq!(g.gate(50.0), GateDecision::SuppressNoise);
    }

    #[test]
    fn test_forward_without_far_end() {
        let mut g = gate();
        assert_eq!(g.gate(2000.0), GateDecision::Forward);
        assert!(g.gate(2000.0).passes());
    }

    #[test]
    fn test_echo_suppressed_and_ratio_adapts() {
        let mut g = gate();
        g.observe_playback(4000.0);
        let before = g.echo_ratio();
        // 0.3 × reference: below 2 × 0.5 × reference
        assert_eq!(g.gate(1200.0), GateDecision::SuppressEcho);
        assert!(g.echo_ratio() < before);
        assert!(!GateDecision::SuppressEcho.passes());
    }

    #[test]
    fn test_double_talk_passes() {
        let mut g = gate();
        g.observe_playback(1000.0);
        assert_eq!(g.gate(1500.0), GateDecision::DoubleTalk);
        assert_eq!(g.echo_ratio(), 0.5);
    }

    #[test]
    fn test_reference_decays() {
        let mut g = gate();
        g.observe_playback(1000.0);
        g.observe_playback(0.0);
        assert!((g.reference() - 850.0).abs() < 0.01);
        for _ in 0..40 {
            g.observe_playback(0.0);
        }
        assert_eq!(g.gate(400.0), GateDecision::Forward);
    }

    #[test]
    fn test_disabled_gate_only_applies_noise_floor() {
        let mut g = EchoGate::new(EchoConfig {
            enabled: false,
            ..EchoConfig::default()
        });
        g.observe_playback(8000.0);
        assert_eq!(g.gate(500.0), GateDecision::Forward);
        assert_eq!(g.gate(10.0), GateDecision::SuppressNoise);
    }
}
