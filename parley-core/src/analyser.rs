//! Byte-valued spectrum summary of a live tap, for visualization.
//!
//! ## Algorithm (per `update()`)
//!
//! 1. Snapshot the newest `fft_size` samples from the tap (zero-padded).
//! 2. Apply a Blackman window and run a forward FFT.
//! 3. Magnitude of each of the first `fft_size / 2` bins, normalised by
//!    `fft_size`, blended with the previous frame by `smoothing`.
//! 4. Convert to dB and map `[min_db, max_db]` linearly onto `[0, 255]`.
//!
//! With the default 32-point FFT this yields 16 bytes. Visual consumers read
//! `data()[0..3]` as a coarse low/mid/high energy proxy; that is a heuristic,
//! not a calibrated band split.

use std::{f32::consts::PI, sync::Arc};

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

use crate::audio::tap::AudioTap;

/// Analyser parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserConfig {
    /// FFT length; must be a power of two ≥ 8. Default: 32.
    pub fft_size: usize,
    /// Blend factor with the previous frame in [0, 1). Default: 0.8.
    pub smoothing: f32,
    /// dB mapped to byte 0. Default: -100.
    pub min_db: f32,
    /// dB mapped to byte 255. Default: -30.
    pub max_db: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 32,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

impl AnalyserConfig {
    pub(crate) fn normalized(mut self) -> Self {
        self.fft_size = self.fft_size.max(8).next_power_of_two();
        self.smoothing = self.smoothing.clamp(0.0, 0.99);
        if self.max_db <= self.min_db {
            self.max_db = self.min_db + 1.0;
        }
        self
    }
}

/// Coarse energy proxy read from the first three bins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyLevels {
    pub low: u8,
    pub mid: u8,
    pub high: u8,
}

impl EnergyLevels {
    /// Sum of the three buckets, the scalar level the visuals scale by.
    pub fn total(&self) -> u16 {
        self.low as u16 + self.mid as u16 + self.high as u16
    }
}

pub struct Analyser {
    tap: Arc<AudioTap>,
    config: AnalyserConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<f32>,
    spectrum: Vec<Complex32>,
    smoothed: Vec<f32>,
    data: Vec<u8>,
}

impl Analyser {
    pub fn new(tap: Arc<AudioTap>, config: AnalyserConfig) -> Self {
        let config = config.normalized();
        let n = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        Self {
            tap,
            config,
            fft,
            window: blackman(n),
            scratch: vec![0.0; n],
            spectrum: vec![Complex32::new(0.0, 0.0); n],
            smoothed: vec![0.0; n / 2],
            data: vec![0; n / 2],
        }
    }

    pub fn config(&self) -> AnalyserConfig {
        self.config
    }

    /// Recompute `data` from the tap's current contents.
    pub fn update(&mut self) {
        let n = self.config.fft_size;
        self.tap.snapshot(&mut self.scratch);
        for (i, slot) in self.spectrum.iter_mut().enumerate() {
            *slot = Complex32::new(self.scratch[i] * self.window[i], 0.0);
        }
        self.fft.process(&mut self.spectrum);

        let tau = self.config.smoothing;
        let range = self.config.max_db - self.config.min_db;
        for bin in 0..n / 2 {
            let magnitude = self.spectrum[bin].norm() / n as f32;
            let blended = tau * self.smoothed[bin] + (1.0 - tau) * magnitude;
            self.smoothed[bin] = if blended.is_finite() { blended } else { 0.0 };

            let db = if self.smoothed[bin] > 0.0 {
                20.0 * self.smoothed[bin].log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - self.config.min_db) / range;
            self.data[bin] = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    /// The summary vector: `fft_size / 2` bytes, overwritten on each `update()`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn levels(&self) -> EnergyLevels {
        EnergyLevels {
            low: self.data.first().copied().unwrap_or(0),
            mid: self.data.get(1).copied().unwrap_or(0),
            high: self.data.get(2).copied().unwrap_or(0),
        }
    }

    /// `data[0] + data[1] + data[2]`.
    pub fn energy(&self) -> u16 {
        self.levels().total()
    }

    /// Forget smoothing history and zero the summary.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.data.fill(0);
    }
}

fn blackman(n: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyser_on(samples: &[f32], config: AnalyserConfig) -> (Arc<AudioTap>, Analyser) {
        let tap = Arc::new(AudioTap::new(config.fft_size * 4));
        tap.write(samples);
        let analyser = Analyser::new(Arc::clone(&tap), config);
        (tap, analyser)
    }

    #[test]
    fn silence_reads_as_zero() {
        let (_tap, mut a) = analyser_on(&[0.0; 64], AnalyserConfig::default());
        a.update();
        assert_eq!(a.data().len(), 16);
        assert!(a.data().iter().all(|b| *b == 0));
        assert_eq!(a.energy(), 0);
    }

    #[test]
    fn loud_low_tone_lights_the_low_bucket() {
        let config = AnalyserConfig {
            smoothing: 0.0,
            ..Default::default()
        };
        // One cycle per 32 samples lands in bin 1.
        let tone: Vec<f32> = (0..128)
            .map(|i| 0.8 * (2.0 * PI * i as f32 / 32.0).sin())
            .collect();
        let (_tap, mut a) = analyser_on(&tone, config);
        a.update();
        let levels = a.levels();
        assert!(levels.mid > 200, "bin 1 should be near full scale: {levels:?}");
        assert!(a.data()[1] > a.data()[8]);
    }

    #[test]
    fn smoothing_decays_after_signal_stops() {
        let tone: Vec<f32> = (0..32)
            .map(|i| 0.8 * (2.0 * PI * i as f32 / 32.0).sin())
            .collect();
        let (tap, mut a) = analyser_on(&tone, AnalyserConfig::default());
        a.update();
        let lit = a.data()[1];
        tap.write(&[0.0; 32]);
        a.update();
        assert!(a.data()[1] <= lit);
        assert!(a.data()[1] > 0, "smoothing keeps some history");
    }

    #[test]
    fn two_analysers_on_one_tap_are_independent() {
        let tone: Vec<f32> = (0..64)
            .map(|i| 0.5 * (2.0 * PI * i as f32 / 8.0).sin())
            .collect();
        let (tap, mut a) = analyser_on(&tone, AnalyserConfig::default());
        let mut b = Analyser::new(Arc::clone(&tap), AnalyserConfig::default());
        a.update();
        a.update();
        b.update();
        b.update();
        assert_eq!(a.data(), b.data());
        a.reset();
        assert!(a.data().iter().all(|v| *v == 0));
        assert!(b.data().iter().any(|v| *v > 0));
    }

    #[test]
    fn config_is_normalised() {
        let tap = Arc::new(AudioTap::new(16));
        let a = Analyser::new(
            tap,
            AnalyserConfig {
                fft_size: 20,
                smoothing: 2.0,
                min_db: -30.0,
                max_db: -40.0,
            },
        );
        let c = a.config();
        assert_eq!(c.fft_size, 32);
        assert!(c.smoothing < 1.0);
        assert!(c.max_db > c.min_db);
        assert_eq!(a.data().len(), 16);
    }
}
