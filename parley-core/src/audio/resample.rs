//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Never called from a device callback. Users:
//! - the capture worker, when a microphone refuses 16 kHz and delivers its
//!   native rate (commonly 44.1 or 48 kHz);
//! - the output thread, when a speaker refuses 24 kHz;
//! - the playback scheduler, for chunks declared at a foreign rate;
//! - the loopback transport, which turns 16 kHz outbound frames into 24 kHz
//!   model audio.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{ParleyError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when both rates match.
    resampler: Option<FastFixedIn<f32>>,
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// One channel, sized for rubato's largest output.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Convert `source_rate` audio to `target_rate`, feeding rubato
    /// `chunk_size` input frames at a time.
    ///
    /// # Errors
    /// `ParleyError::AudioStream` for a zero rate or chunk size, or when
    /// rubato refuses the ratio.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(ParleyError::AudioStream(format!(
                "cannot convert {source_rate} Hz to {target_rate} Hz in chunks of {chunk_size}"
            )));
        }
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            f64::from(target_rate) / f64::from(source_rate),
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| ParleyError::AudioStream(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]];

        debug!(source_rate, target_rate, chunk_size, "resampler ready");
        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Convert `samples`, returning whatever output whole chunks produced.
    /// A short tail is held back until the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };
        self.input_buf.extend_from_slice(samples);

        let mut out = Vec::new();
        let mut consumed = 0;
        for chunk in self.input_buf.chunks_exact(self.chunk_size) {
            match resampler.process_into_buffer(&[chunk], &mut self.output_buf, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.output_buf[0][..produced]),
                // The chunk is lost; later chunks still convert.
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.chunk_size;
        }
        self.input_buf.drain(..consumed);
        out
    }

    /// Input samples held back waiting for a full chunk.
    pub fn pending(&self) -> usize {
        self.input_buf.len()
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_through() {
        let mut rc = RateConverter::new(16_000, 16_000, 256).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        assert_eq!(rc.process(&samples), samples);
        assert_eq!(rc.pending(), 0);
    }

    #[test]
    fn capture_block_upsamples_to_playback_rate() {
        let mut rc = RateConverter::new(16_000, 24_000, 256).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&[0.0f32; 256]);
        let expected = 384isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 10,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn native_48k_mic_downsamples_to_capture_rate() {
        let mut rc = RateConverter::new(48_000, 16_000, 768).unwrap();
        let out = rc.process(&vec![0.0f32; 768]);
        assert!((out.len() as isize - 256).unsigned_abs() <= 10);
    }

    #[test]
    fn zero_rates_are_rejected() {
        assert!(RateConverter::new(0, 16_000, 256).is_err());
        assert!(RateConverter::new(48_000, 0, 256).is_err());
        assert!(RateConverter::new(16_000, 16_000, 0).is_err());
    }

    #[test]
    fn several_chunks_in_one_call_all_convert() {
        let mut rc = RateConverter::new(24_000, 16_000, 240).unwrap();
        let out = rc.process(&[0.0f32; 1_000]);
        assert_eq!(rc.pending(), 40);
        assert!((out.len() as isize - 640).unsigned_abs() <= 10, "got {}", out.len());
    }

    #[test]
    fn short_input_is_held_until_a_full_chunk() {
        let mut rc = RateConverter::new(16_000, 24_000, 256).unwrap();
        assert!(rc.process(&[0.0f32; 200]).is_empty());
        assert_eq!(rc.pending(), 200);
        assert!(!rc.process(&[0.0f32; 100]).is_empty());
        assert_eq!(rc.pending(), 44);
    }
}
