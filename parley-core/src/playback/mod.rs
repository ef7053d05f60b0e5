//! Gapless playback scheduling with immediate interruption.
//!
//! ## Timeline
//!
//! ```text
//! enqueue(d1)  enqueue(d2)      enqueue(d3)
//!     │            │                 │
//!     ▼            ▼                 ▼
//! ├── src 1 ──┤── src 2 ──┤─(gap)─├── src 3 ──┤
//! t0          t0+d1       t0+d1+d2 now        ▲ next_start_time
//! ```
//!
//! Every source starts at `max(next_start_time, now)` where `now` is the
//! output context's clock. Chunks that arrive early queue back to back;
//! chunks that arrive late start immediately and leave a short gap rather
//! than being reordered.
//!
//! `interrupt()` stops every active source within the call and resets the
//! cursor to 0, so the next chunk starts at `now`.
//!
//! ## Ownership
//!
//! The cursor and the active set live behind one `parking_lot::Mutex` shared
//! only with this scheduler's `Renderer`. The scheduler mutates them from its
//! own entry points; the renderer only retires sources that finished playing.

pub mod renderer;

pub use renderer::Renderer;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    audio::{context::AudioContext, resample::RateConverter, tap::AudioTap},
    buffering::block::AudioBuffer,
};

pub type SourceId = u64;

/// Snapshot of one scheduled source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Start, in output-context seconds.
    pub start_time: f64,
    /// Length in seconds.
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Lifetime counters for the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub scheduled: u64,
    /// Sources that played to their last frame.
    pub ended: u64,
    /// Sources force-stopped by `interrupt()` or `reset()`.
    pub stopped: u64,
    pub interruptions: u64,
    /// Render quanta played as silence because `enqueue` or `interrupt`
    /// held the timeline. Any source in that window loses those frames.
    pub contended_renders: u64,
}

/// An active playback unit.
#[derive(Debug)]
pub(crate) struct ActiveSource {
    pub(crate) info: ScheduledSource,
    pub(crate) buffer: Arc<AudioBuffer>,
    pub(crate) start_frame: u64,
    pub(crate) end_frame: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Timeline {
    pub(crate) next_start_time: f64,
    pub(crate) sources: Vec<ActiveSource>,
    pub(crate) next_id: SourceId,
    pub(crate) stats: PlaybackStats,
}

impl Timeline {
    /// Completion handler: drop sources whose last frame is before `frame`.
    pub(crate) fn retire_ended(&mut self, frame: u64) {
        let before = self.sources.len();
        self.sources.retain(|s| s.end_frame > frame);
        self.stats.ended += (before - self.sources.len()) as u64;
    }

    fn stop_all(&mut self) -> usize {
        let n = self.sources.len();
        self.sources.clear();
        self.next_start_time = 0.0;
        self.stats.stopped += n as u64;
        n
    }
}

/// Schedules decoded chunks on the output context's timeline.
pub struct PlaybackScheduler {
    context: AudioContext,
    timeline: Arc<Mutex<Timeline>>,
    tap: Arc<AudioTap>,
    /// Bumped by the renderer, which cannot touch `Timeline::stats`
    /// when it lost the lock.
    contended: Arc<AtomicU64>,
}

impl PlaybackScheduler {
    /// `tap` receives every rendered mono mix, for the output analyser.
    pub fn new(context: AudioContext, tap: Arc<AudioTap>) -> Self {
        Self {
            context,
            timeline: Arc::new(Mutex::new(Timeline::default())),
            tap,
            contended: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn tap(&self) -> &Arc<AudioTap> {
        &self.tap
    }

    /// A renderer pulling this scheduler's timeline.
    ///
    /// Attach exactly one renderer to a device: every `render` call advances
    /// the shared output clock.
    pub fn renderer(&self) -> Renderer {
        Renderer::new(
            Arc::clone(&self.timeline),
            Arc::clone(self.context.clock()),
            Arc::clone(&self.tap),
            Arc::clone(&self.contended),
        )
    }

    /// Schedule `buffer` to start when everything already scheduled has
    /// finished, or now if the timeline has drained.
    ///
    /// Buffers declared at a rate other than the output context's are
    /// resampled to it first.
    pub fn enqueue(&self, buffer: AudioBuffer) -> ScheduledSource {
        let buffer = Arc::new(self.conform(buffer));
        let clock = self.context.clock();

        let mut timeline = self.timeline.lock();
        let now = clock.current_time();
        let start_time = timeline.next_start_time.max(now);
        let duration = buffer.duration();

        let id = timeline.next_id;
        timeline.next_id += 1;

        let start_frame = clock.seconds_to_frame(start_time);
        let info = ScheduledSource {
            id,
            start_time,
            duration,
        };
        timeline.sources.push(ActiveSource {
            info,
            start_frame,
            end_frame: start_frame + buffer.frames() as u64,
            buffer,
        });
        timeline.next_start_time = start_time + duration;
        timeline.stats.scheduled += 1;

        debug!(
            id,
            start_time,
            duration,
            lead = start_time - now,
            active = timeline.sources.len(),
            "chunk scheduled"
        );
        info
    }

    /// Stop every active source now and reset the cursor to 0.
    ///
    /// Returns the number of sources stopped. Safe on an empty set.
    pub fn interrupt(&self) -> usize {
        let mut timeline = self.timeline.lock();
        let stopped = timeline.stop_all();
        timeline.stats.interruptions += 1;
        info!(stopped, "playback interrupted");
        stopped
    }

    /// Flush all scheduled state, e.g. when the session is torn down.
    /// Does not touch the output device.
    pub fn reset(&self) {
        let stopped = self.timeline.lock().stop_all();
        self.tap.clear();
        debug!(stopped, "playback reset");
    }

    /// End of the already-scheduled timeline, in output-context seconds.
    pub fn next_start_time(&self) -> f64 {
        self.timeline.lock().next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.timeline.lock().sources.len()
    }

    pub fn active_sources(&self) -> Vec<ScheduledSource> {
        self.timeline.lock().sources.iter().map(|s| s.info).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.timeline.lock().sources.is_empty()
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            contended_renders: self.contended.load(Ordering::Relaxed),
            ..self.timeline.lock().stats
        }
    }

    fn conform(&self, buffer: AudioBuffer) -> AudioBuffer {
        let target = self.context.sample_rate();
        if buffer.sample_rate() == target || buffer.frames() == 0 {
            return buffer;
        }
        let mono: Vec<f32> = (0..buffer.frames()).map(|f| buffer.mono_sample(f)).collect();
        match RateConverter::new(buffer.sample_rate(), target, mono.len()) {
            Ok(mut rc) => {
                debug!(from = buffer.sample_rate(), to = target, "resampling chunk for playback");
                AudioBuffer::mono(rc.process(&mono), target)
            }
            Err(e) => {
                warn!("cannot resample chunk ({e}); playing at declared rate");
                buffer
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const RATE: u32 = 24_000;

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(AudioContext::new(RATE), Arc::new(AudioTap::new(128)))
    }

    fn chunk(seconds: f64) -> AudioBuffer {
        AudioBuffer::mono(vec![0.25; (seconds * RATE as f64).round() as usize], RATE)
    }

    fn advance(s: &PlaybackScheduler, seconds: f64) {
        let mut r = s.renderer();
        let mut out = vec![0.0; (seconds * RATE as f64).round() as usize];
        r.render(&mut out);
    }

    #[test]
    fn back_to_back_chunks_are_gapless() {
        let s = scheduler();
        advance(&s, 0.05);
        let t = s.context().current_time();

        let a = s.enqueue(chunk(0.1));
        let b = s.enqueue(chunk(0.1));
        let c = s.enqueue(chunk(0.1));

        assert_abs_diff_eq!(a.start_time, t, epsilon = 1e-9);
        assert_abs_diff_eq!(b.start_time, t + 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(c.start_time, t + 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(s.next_start_time(), t + 0.3, epsilon = 1e-9);
        assert_eq!(s.active_count(), 3);
    }

    #[test]
    fn late_chunk_starts_now_not_in_the_past() {
        let s = scheduler();
        s.enqueue(chunk(0.1));
        advance(&s, 0.25);

        let late = s.enqueue(chunk(0.1));
        let now = s.context().current_time();
        assert_abs_diff_eq!(late.start_time, now, epsilon = 1e-9);
        assert!(s.next_start_time() >= now);
    }

    #[test]
    fn early_chunk_queues_behind_predecessor() {
        let s = scheduler();
        let first = s.enqueue(chunk(0.2));
        advance(&s, 0.05);
        let second = s.enqueue(chunk(0.1));
        assert_abs_diff_eq!(second.start_time, first.end_time(), epsilon = 1e-9);
    }

    #[test]
    fn interrupt_clears_sources_and_cursor() {
        let s = scheduler();
        s.enqueue(chunk(0.1));
        s.enqueue(chunk(0.1));
        advance(&s, 0.02);
        assert_eq!(s.active_count(), 2);

        assert_eq!(s.interrupt(), 2);
        assert_eq!(s.active_count(), 0);
        assert_eq!(s.next_start_time(), 0.0);

        let now = s.context().current_time();
        let next = s.enqueue(chunk(0.1));
        assert_abs_diff_eq!(next.start_time, now, epsilon = 1e-9);
        assert!(next.start_time < 0.2, "must not resume from the stale cursor");

        let stats = s.stats();
        assert_eq!(stats.stopped, 2);
        assert_eq!(stats.interruptions, 1);
    }

    #[test]
    fn interrupt_on_empty_set_is_harmless() {
        let s = scheduler();
        assert_eq!(s.interrupt(), 0);
        assert_eq!(s.interrupt(), 0);
        assert!(s.is_idle());
    }

    #[test]
    fn finished_sources_leave_the_active_set() {
        let s = scheduler();
        s.enqueue(chunk(0.1));
        s.enqueue(chunk(0.1));
        advance(&s, 0.15);
        assert_eq!(s.active_count(), 1);
        advance(&s, 0.1);
        assert!(s.is_idle());
        assert_eq!(s.stats().ended, 2);
        assert_eq!(s.stats().stopped, 0);
    }

    #[test]
    fn reset_flushes_without_counting_an_interruption() {
        let s = scheduler();
        s.enqueue(chunk(0.1));
        s.reset();
        assert!(s.is_idle());
        assert_eq!(s.next_start_time(), 0.0);
        assert_eq!(s.stats().interruptions, 0);
    }

    #[test]
    fn foreign_rate_chunk_is_resampled_to_output_rate() {
        let s = scheduler();
        let at_16k = AudioBuffer::mono(vec![0.1; 1_600], 16_000);
        let scheduled = s.enqueue(at_16k);
        assert!((scheduled.duration - 0.1).abs() < 0.005);
    }
}
