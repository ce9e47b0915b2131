//! Bounded jitter buffer for encoded RTP payloads
//!
//! Arrival order is playout order: the duplicate window in
//! [`cellgate_rtp_core::RtpStats`] already filters repeats, and with 20 ms
//! frames over a few hops reordering is rare enough that sorting is not
//! worth the latency. The buffer never blocks the receive path; when full,
//! the oldest frame goes.

use std::collections::VecDeque;

use bytes::Bytes;

/// Jitter buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    /// Frames dropped because the buffer was full
    pub overflow_drops: u64,
    /// Frames dropped while trimming back to the target depth
    pub trimmed: u64,
    /// Playout ticks that found the buffer empty
    pub underruns: u64,
}

/// FIFO of encoded frames with a hard capacity and a trim target
#[derive(Debug)]
pub struct JitterBuffer {
    frames: VecDeque<Bytes>,
    capacity: usize,
    target: usize,
    stats: JitterStats,
}

impl JitterBuffer {
    /// `target` is clamped to `1..=capacity`
    pub fn new(capacity: usize, target: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            target: target.clamp(1, capacity),
            stats: JitterStats::default(),
        }
    }

    /// Queue a frame, evicting the oldest when full
    pub fn push(&mut self, payload: Bytes) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.stats.overflow_drops += 1;
        }
        self.frames.push_back(payload);
    }

    /// Next frame for playout
    ///
    /// A buffer that has grown past its target is first trimmed back to it,
    /// which bounds the added latency after a burst.
    pub fn pop(&mut self) -> Option<Bytes> {
        while self.frames.len() > self.target {
            self.frames.pop_front();
            self.stats.trimmed += 1;
        }
        let frame = self.frames.pop_front();
        if frame.is_none() {
            self.stats.underruns += 1;
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let mut jb = JitterBuffer::new(8, 5);
        for n in 0..20 {
            jb.push(frame(n));
        }
        assert_eq!(jb.len(), 8);
        assert_eq!(jb.stats().overflow_drops, 12);
        let kept: Vec<u8> = jb.frames.iter().map(|f| f[0]).collect();
        assert_eq!(kept, (12..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_pop_trims_to_target() {
        let mut jb = JitterBuffer::new(8, 5);
        for n in 0..8 {
            jb.push(frame(n));
        }
        assert_eq!(jb.pop().map(|f| f[0]), Some(3));
        assert_eq!(jb.stats().trimmed, 3);
        assert_eq!(jb.len(), 4);
        assert_eq!(jb.pop().map(|f| f[0]), Some(4));
    }

    #[test]
    fn test_underrun_counted() {
        let mut jb = JitterBuffer::new(8, 5);
        assert!(jb.pop().is_none());
        jb.push(frame(1));
        assert_eq!(jb.pop().map(|f| f[0]), Some(1));
        assert!(jb.pop().is_none());
        assert_eq!(jb.stats().underruns, 2);
        assert!(jb.is_empty());
    }
}
