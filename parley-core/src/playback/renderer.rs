//! Pulls the scheduled timeline into device buffers.
//!
//! Called from the output device callback. Each call:
//! 1. mixes every active source overlapping `[now, now + frames)` at its
//!    absolute frame position,
//! 2. retires sources whose last frame has been rendered,
//! 3. advances the output clock by `frames`,
//! 4. copies the mono mix into the output tap.
//!
//! The timeline lock is only ever `try_lock`ed here. A contended callback
//! renders silence but still advances the clock, so the time base never
//! stalls behind the device. Those quanta are counted in
//! `PlaybackStats::contended_renders`.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use super::Timeline;
use crate::audio::{context::FrameClock, tap::AudioTap};

pub struct Renderer {
    timeline: Arc<Mutex<Timeline>>,
    clock: Arc<FrameClock>,
    tap: Arc<AudioTap>,
    contended: Arc<AtomicU64>,
    mix: Vec<f32>,
}

impl Renderer {
    pub(crate) fn new(
        timeline: Arc<Mutex<Timeline>>,
        clock: Arc<FrameClock>,
        tap: Arc<AudioTap>,
        contended: Arc<AtomicU64>,
    ) -> Self {
        Self {
            timeline,
            clock,
            tap,
            contended,
            mix: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Render `out.len()` mono frames.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() as u64;
        if frames == 0 {
            return;
        }

        match self.timeline.try_lock() {
            Some(mut timeline) => {
                let base = self.clock.frames();
                let end = base + frames;
                for src in &timeline.sources {
                    let from = src.start_frame.max(base);
                    let to = src.end_frame.min(end);
                    for frame in from..to {
                        let offset = (frame - src.start_frame) as usize;
                        out[(frame - base) as usize] += src.buffer.mono_sample(offset);
                    }
                }
                timeline.retire_ended(end);
                self.clock.advance(frames);
            }
            None => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                self.clock.advance(frames);
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        self.tap.try_write(out);
    }

    /// Render into an interleaved buffer, duplicating the mono mix across
    /// `channels`.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if channels == 1 {
            self.render(out);
            return;
        }
        let frames = out.len() / channels;
        let mut mix = std::mem::take(&mut self.mix);
        mix.resize(frames, 0.0);
        self.render(&mut mix);
        for (frame, value) in out.chunks_exact_mut(channels).zip(&mix) {
            frame.fill(*value);
        }
        self.mix = mix;
    }
}
