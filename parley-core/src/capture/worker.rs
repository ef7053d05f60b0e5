//! Blocking capture worker loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → scratch (one drain per iteration)
//! 2. Resample device rate → capture rate (passthrough when equal)
//! 3. Frame into fixed `block_size` blocks
//! 4. For each complete block, in order:
//!    a. write it to the input tap
//!    b. hand it to the block sink (encode + send happens there)
//! ```
//!
//! The sink is invoked once per block, on this thread, never batched. A
//! partial block left over when capture stops is discarded.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, info};

use crate::{
    audio::{resample::RateConverter, tap::AudioTap},
    buffering::{block::PcmBlock, AudioConsumer, Consumer},
    error::Result,
};

/// Receives each captured block.
pub type BlockSink = Box<dyn FnMut(PcmBlock) + Send + 'static>;

#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub samples_in: AtomicU64,
    pub blocks_emitted: AtomicU64,
    pub samples_discarded: AtomicU64,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.blocks_emitted.store(0, Ordering::Relaxed);
        self.samples_discarded.store(0, Ordering::Relaxed);
    }

    pub fn blocks_emitted(&self) -> u64 {
        self.blocks_emitted.load(Ordering::Relaxed)
    }
}

/// Everything the worker needs, passed as one struct so the closure stays tidy.
pub struct WorkerContext {
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub device_sample_rate: u32,
    pub capture_sample_rate: u32,
    pub block_size: usize,
    pub tap: Arc<AudioTap>,
    pub sink: BlockSink,
    pub diagnostics: Arc<CaptureDiagnostics>,
}

/// Samples drained from the ring per iteration (three default blocks).
const DRAIN_CHUNK: usize = 768;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY: Duration = Duration::from_millis(2);

/// A worker whose resampler is ready, so `run` cannot fail.
pub struct Worker {
    ctx: WorkerContext,
    resampler: RateConverter,
    block_size: usize,
}

impl Worker {
    /// Build the device-rate → capture-rate converter.
    ///
    /// # Errors
    /// `ParleyError::AudioStream` when the device reports a rate that cannot
    /// be converted (e.g. 0 Hz).
    pub fn new(ctx: WorkerContext) -> Result<Self> {
        let resampler =
            RateConverter::new(ctx.device_sample_rate, ctx.capture_sample_rate, DRAIN_CHUNK)?;
        if !resampler.is_passthrough() {
            info!(
                from = ctx.device_sample_rate,
                to = ctx.capture_sample_rate,
                "device refused capture rate, resampling"
            );
        }
        Ok(Self {
            block_size: ctx.block_size.max(1),
            ctx,
            resampler,
        })
    }

    /// Run until `running` becomes false.
    pub fn run(self) {
        let Self {
            mut ctx,
            mut resampler,
            block_size,
        } = self;
        info!(
            device_rate = ctx.device_sample_rate,
            capture_rate = ctx.capture_sample_rate,
            block_size,
            "capture worker started"
        );

        let mut raw = vec![0f32; DRAIN_CHUNK];
        let mut pending: Vec<f32> = Vec::with_capacity(block_size * 4);

        while ctx.running.load(Ordering::Relaxed) {
            let n = ctx.consumer.pop_slice(&mut raw);
            if n == 0 {
                std::thread::sleep(SLEEP_EMPTY);
                continue;
            }
            ctx.diagnostics
                .samples_in
                .fetch_add(n as u64, Ordering::Relaxed);

            pending.extend_from_slice(&resampler.process(&raw[..n]));

            let mut emitted = 0usize;
            while pending.len() >= block_size {
                // Re-check between blocks so stop() is honoured promptly.
                if !ctx.running.load(Ordering::Relaxed) {
                    break;
                }
                let samples: Vec<f32> = pending.drain(..block_size).collect();
                ctx.tap.write(&samples);
                (ctx.sink)(PcmBlock::new(samples, ctx.capture_sample_rate));
                ctx.diagnostics
                    .blocks_emitted
                    .fetch_add(1, Ordering::Relaxed);
                emitted += 1;
            }
            if emitted > 0 {
                debug!(emitted, pending = pending.len(), "capture blocks emitted");
            }
        }

        let discarded = pending.len() + resampler.pending();
        ctx.diagnostics
            .samples_discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        info!(discarded, "capture worker stopped");
    }
}
