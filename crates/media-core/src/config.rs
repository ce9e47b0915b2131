//! Media session configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// Echo / double-talk gate tuning
///
/// These are device dependent; the defaults suit a handset whose earpiece
/// leaks into its microphone at roughly half amplitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Disable to forward all capture above the noise floor
    pub enabled: bool,
    /// Per-frame decay of the playback loudness reference
    pub reference_decay: f32,
    /// Playback reference (RMS) above which echo is expected
    pub reference_threshold: f32,
    /// Capture RMS below which audio is always suppressed
    pub noise_floor: f32,
    /// Starting estimate of capture RMS ÷ playback RMS for pure echo
    pub initial_echo_ratio: f32,
    /// Capture above `double_talk_margin × ratio × reference` is near-end speech
    pub double_talk_margin: f32,
    /// Exponential moving average weight for ratio updates
    pub ratio_smoothing: f32,
    /// Lower clamp for the learned ratio
    pub min_echo_ratio: f32,
    /// Upper clamp for the learned ratio
    pub max_echo_ratio: f32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_decay: 0.85,
            reference_threshold: 300.0,
            noise_floor: 120.0,
            initial_echo_ratio: 0.5,
            double_talk_margin: 2.0,
            ratio_smoothing: 0.1,
            min_echo_ratio: 0.05,
            max_echo_ratio: 4.0,
        }
    }
}

/// Media session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Address RTP sockets bind to
    pub bind_address: IpAddr,
    /// First port tried for RTP
    pub rtp_port_min: u16,
    /// Last port tried for RTP
    pub rtp_port_max: u16,
    /// Sample rate of the audio source and sink
    pub device_sample_rate: u32,
    /// Jitter buffer capacity in 20 ms frames
    pub jitter_capacity: usize,
    /// Depth the jitter buffer is trimmed back to
    pub jitter_target: usize,
    /// Seconds without inbound RTP before the session reports a timeout
    pub inactivity_timeout_secs: u64,
    /// Linear gain applied to decoded audio
    pub playback_gain: f32,
    pub echo: EchoConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rtp_port_min: 10000,
            rtp_port_max: 20000,
            device_sample_rate: 16000,
            jitter_capacity: 8,
            jitter_target: 5,
            inactivity_timeout_secs: 30,
            playback_gain: 1.0,
            echo: EchoConfig::default(),
        }
    }
}

impl MediaConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rtp_port_min > self.rtp_port_max {
            return Err(MediaError::Config("rtp_port_min exceeds rtp_port_max".into()));
        }
        if self.jitter_capacity == 0 || self.jitter_target == 0 || self.jitter_target > self.jitter_capacity {
            return Err(MediaError::Config("need 0 < jitter_target <= jitter_capacity".into()));
        }
        if !matches!(self.device_sample_rate, 8000 | 16000) {
            return Err(MediaError::Config(format!(
                "device_sample_rate {} not supported (8000 or 16000)",
                self.device_sample_rate
            )));
        }
        if self.inactivity_timeout_secs == 0 {
            return Err(MediaError::Config("inactivity_timeout_secs must be positive".into()));
        }
        let echo = &self.echo;
        if !(0.0..1.0).contains(&echo.reference_decay) || !(0.0..=1.0).contains(&echo.ratio_smoothing) {
            return Err(MediaError::Config("echo decay and smoothing must lie in [0, 1)".into()));
        }
        if echo.min_echo_ratio <= 0.0 || echo.min_echo_ratio > echo.max_echo_ratio {
            return Err(MediaError::Config("need 0 < min_echo_ratio <= max_echo_ratio".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MediaConfig::default();
        config.validate().unwrap();
        assert_eq!(config.jitter_capacity, 8);
        assert_eq!(config.jitter_target, 5);
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = MediaConfig::default();
        config.jitter_target = 9;
        assert!(config.validate().is_err());

        let mut config = MediaConfig::default();
        config.device_sample_rate = 44100;
        assert!(config.validate().is_err());

        let mut config = MediaConfig::default();
        config.rtp_port_min = 30000;
        assert!(config.validate().is_err());
    }
}
