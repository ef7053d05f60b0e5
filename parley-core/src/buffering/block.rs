//! Sample containers passed between pipeline stages.

use std::sync::Arc;

/// A fixed-length block of mono capture samples in [-1.0, 1.0].
///
/// Immutable once produced; cloning shares the underlying samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PcmBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decoded, playable audio: planar f32 channels at a declared sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from planar channel data.
    ///
    /// All channels must have the same length; `channels` must not be empty.
    pub fn from_planar(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty(), "audio buffer needs at least one channel");
        debug_assert!(
            channels.windows(2).all(|w| w[0].len() == w[1].len()),
            "audio buffer channels must be equal length"
        );
        Self {
            channels,
            sample_rate,
        }
    }

    /// Single-channel convenience constructor.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::from_planar(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds: frames / sample rate.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average of all channels at `frame`, or 0.0 past the end.
    pub fn mono_sample(&self, frame: usize) -> f32 {
        let n = self.channels.len();
        if n == 1 {
            return self.channels[0].get(frame).copied().unwrap_or(0.0);
        }
        let sum: f32 = self
            .channels
            .iter()
            .map(|c| c.get(frame).copied().unwrap_or(0.0))
            .sum();
        sum / n as f32
    }
}
