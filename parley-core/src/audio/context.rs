//! Explicit audio-graph contexts.
//!
//! Each `SessionController` owns one input and one output context instead of
//! reaching for process-wide singletons. The output context's `FrameClock` is
//! the time base the playback scheduler reasons in.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Monotonic frame counter advanced by whoever renders the graph.
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Graph time in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Advance by `frames`; called once per render quantum.
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn seconds_to_frame(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }
}

/// A graph root: a sample rate plus the clock rendering advances.
#[derive(Debug, Clone)]
pub struct AudioContext {
    sample_rate: u32,
    clock: Arc<FrameClock>,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: Arc::new(FrameClock::new(sample_rate)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock(&self) -> &Arc<FrameClock> {
        &self.clock
    }

    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_reports_seconds_from_frames() {
        let ctx = AudioContext::new(24_000);
        assert_eq!(ctx.current_time(), 0.0);
        ctx.clock().advance(12_000);
        assert!((ctx.current_time() - 0.5).abs() < 1e-12);
        assert_eq!(ctx.clock().seconds_to_frame(0.25), 6_000);
        assert_eq!(ctx.clock().seconds_to_frame(-1.0), 0);
    }

    #[test]
    fn cloned_context_shares_its_clock() {
        let a = AudioContext::new(16_000);
        let b = a.clone();
        a.clock().advance(160);
        assert_eq!(b.clock().frames(), 160);
    }
}
