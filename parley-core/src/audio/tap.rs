//! Read-only taps onto a live stream, for analysers.
//!
//! A tap keeps the most recent samples of a stream in a bounded window that
//! overwrites its oldest samples when full. Readers take non-consuming
//! snapshots, so any number of analysers can observe the same tap without
//! affecting each other or the audio path.

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};

pub struct AudioTap {
    window: Mutex<HeapRb<f32>>,
    capacity: usize,
}

impl AudioTap {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(HeapRb::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append samples, blocking briefly if a reader holds the window.
    pub fn write(&self, samples: &[f32]) {
        self.window.lock().push_slice_overwrite(self.newest(samples));
    }

    /// Append samples without blocking; returns `false` if the write was
    /// skipped because a reader held the window. Used from real-time callbacks.
    pub fn try_write(&self, samples: &[f32]) -> bool {
        match self.window.try_lock() {
            Some(mut w) => {
                w.push_slice_overwrite(self.newest(samples));
                true
            }
            None => false,
        }
    }

    /// Copy the newest `out.len()` samples into `out`, oldest first.
    /// Missing history is zero-filled at the front.
    pub fn snapshot(&self, out: &mut [f32]) {
        let window = self.window.lock();
        let available = window.occupied_len();
        let take = available.min(out.len());
        let pad = out.len() - take;
        out[..pad].fill(0.0);
        for (dst, src) in out[pad..].iter_mut().zip(window.iter().skip(available - take)) {
            *dst = *src;
        }
    }

    /// Only the tail of an oversized write can survive in the window.
    fn newest<'a>(&self, samples: &'a [f32]) -> &'a [f32] {
        &samples[samples.len().saturating_sub(self.capacity)..]
    }

    pub fn clear(&self) {
        self.window.lock().clear();
    }
}

impl std::fmt::Debug for AudioTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTap")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
