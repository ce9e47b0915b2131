//! Audio I/O seams and sample helpers
//!
//! The media session never touches an OS device. It pulls 20 ms PCM16
//! capture frames from an [`AudioSource`] and pushes 20 ms playback frames
//! into an [`AudioSink`]. Both are polled from the 20 ms pump loops, so
//! implementations must return immediately: a source with nothing ready
//! returns `None` and the session sends silence in its place.

use std::collections::VecDeque;
use std::fmt::Debug;

use parking_lot::Mutex;

/// Capture side of a device
pub trait AudioSource: Send + Sync + Debug {
    /// Fixed sample rate of every frame this source produces
    fn sample_rate(&self) -> u32;

    /// Next 20 ms frame, or `None` when no frame is ready
    fn read_frame(&self) -> Option<Vec<i16>>;
}

/// Playback side of a device
pub trait AudioSink: Send + Sync + Debug {
    /// Fixed sample rate this sink expects
    fn sample_rate(&self) -> u32;

    /// Accept one 20 ms frame
    fn write_frame(&self, frame: &[i16]);
}

/// Samples in one 20 ms frame at `sample_rate`
pub fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate / 50) as usize
}

/// One 20 ms frame of silence
pub fn silence(sample_rate: u32) -> Vec<i16> {
    vec![0; frame_samples(sample_rate)]
}

/// Root mean square of a frame
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Scale a frame in place, saturating at the i16 limits
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in samples.iter_mut() {
        let scaled = f32::from(*sample) * gain;
        *sample = scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }
}

/// Source fed from a queue of prepared frames
#[derive(Debug)]
pub struct QueueSource {
    sample_rate: u32,
    frames: Mutex<VecDeque<Vec<i16>>>,
}

impl QueueSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, frame: Vec<i16>) {
        self.frames.lock().push_back(frame);
    }

    pub fn pending(&self) -> usize {
        self.frames.lock().len()
    }
}

impl AudioSource for QueueSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&self) -> Option<Vec<i16>> {
        self.frames.lock().pop_front()
    }
}

/// Sink that keeps every frame written to it
#[derive(Debug)]
pub struct RecordingSink {
    sample_rate: u32,
    frames: Mutex<Vec<Vec<i16>>>,
}

impl RecordingSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames(&self) -> Vec<Vec<i16>> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl AudioSink for RecordingSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_frame(&self, frame: &[i16]) {
        self.frames.lock().push(frame.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0; 160]), 0.0);
        assert!((rms(&[1000, -1000, 1000, -1000]) - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_apply_gain_saturates() {
        let mut frame = vec![20000, -20000, 100];
        apply_gain(&mut frame, 2.0);
        assert_eq!(frame, vec![i16::MAX, i16::MIN, 200]);
    }

    #[test]
    fn test_frame_geometry() {
        assert_eq!(silence(8000).len(), 160);
        assert_eq!(silence(16000).len(), 320);
    }

    #[test]
    fn test_queue_source_and_recording_sink() {
        let source = QueueSource::new(16000);
        source.push(vec![1; 320]);
        assert_eq!(source.pending(), 1);
        assert_eq!(source.read_frame().map(|f| f.len()), Some(320));
        assert!(source.read_frame().is_none());

        let sink = RecordingSink::new(16000);
        sink.write_frame(&[3; 320]);
        assert_eq!(sink.frame_count(), 1);
        assert_eq!(sink.frames()[0][0], 3);
    }
}
