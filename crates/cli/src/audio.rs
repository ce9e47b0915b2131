//! Device-less audio for running the gateway from a terminal

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};

use cellgate_media_core::audio::{frame_samples, rms};
use cellgate_media_core::{AudioSink, AudioSource};
use tracing::debug;

/// Capture that never has a frame ready, so the session sends silence
#[derive(Debug)]
pub struct NullSource {
    sample_rate: u32,
}

impl NullSource {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioSource for NullSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&self) -> Option<Vec<i16>> {
        None
    }
}

/// Continuous sine tone, handy for checking the PBX hears the gateway
#[derive(Debug)]
pub struct ToneSource {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    position: AtomicU64,
}

impl ToneSource {
    pub fn new(sample_rate: u32, frequency: f32, amplitude: i16) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: f32::from(amplitude),
            position: AtomicU64::new(0),
        }
    }
}

impl AudioSource for ToneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&self) -> Option<Vec<i16>> {
        let len = frame_samples(self.sample_rate);
        let start = self.position.fetch_add(len as u64, Ordering::Relaxed);
        let rate = self.sample_rate as f32;
        let frame = (0..len as u64)
            .map(|i| {
                let n = ((start + i) % self.sample_rate as u64) as f32;
                (self.amplitude * (TAU * self.frequency * n / rate).sin()) as i16
            })
            .collect();
        Some(frame)
    }
}

/// Playback that discards audio and logs its level every few seconds
#[derive(Debug)]
pub struct MeterSink {
    sample_rate: u32,
    frames: AtomicU64,
}

/// 250 frames of 20 ms
const METER_INTERVAL: u64 = 250;

impl MeterSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: AtomicU64::new(0),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl AudioSink for MeterSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_frame(&self, frame: &[i16]) {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % METER_INTERVAL == 0 {
            debug!(frames = count, level = rms(frame), "playback level");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_source_is_silent() {
        let source = NullSource::new(16000);
        assert_eq!(source.sample_rate(), 16000);
        assert!(source.read_frame().is_none());
    }

    #[test]
    fn test_tone_frames_are_continuous() {
        let source = ToneSource::new(8000, 1000.0, 8000);
        let first = source.read_frame().unwrap();
        let second = source.read_frame().unwrap();
        assert_eq!(first.len(), 160);
        assert_eq!(second.len(), 160);
        // 1 kHz at 8 kHz repeats every 8 samples
        assert_eq!(first[0], 0);
        assert!((i32::from(first[2]) - 8000).abs() <= 1);
        assert_eq!(second[0], first[0]);
        let level = rms(&first);
        assert!((level - 8000.0 / 2f32.sqrt()).abs() < 50.0);
    }

    #[test]
    fn test_meter_counts_frames() {
        let sink = MeterSink::new(8000);
        for _ in 0..3 {
            sink.write_frame(&[0; 160]);
        }
        assert_eq!(sink.frames(), 3);
    }
}
