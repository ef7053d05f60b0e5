//! Speaker output backends.
//!
//! An output backend drives a `Renderer` from a device callback. As with
//! input, `cpal::Stream` is `!Send`, so the cpal backend builds and holds the
//! stream on a dedicated thread and hands back a `Send` handle that stops it.
//!
//! Devices that refuse the playback rate run at their default rate. The
//! output thread then renders the timeline in 10 ms quanta, converts them
//! with a `RateConverter` and keeps a small ring topped up; the device
//! callback only pops from that ring.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    audio::resample::RateConverter,
    error::{ParleyError, Result},
    playback::Renderer,
};

/// What the playback side asks a device for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    /// Output rate (Hz). Default: 24000.
    pub sample_rate: u32,
    pub preferred_device: Option<String>,
}

impl Default for PlaybackRequest {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            preferred_device: None,
        }
    }
}

/// A running output stream. `close` must be idempotent.
pub trait OutputStream: Send {
    fn close(&mut self);
}

/// Opens speakers and attaches a renderer to them.
pub trait OutputBackend: Send + Sync + 'static {
    /// # Errors
    /// A device-class `ParleyError` when no output device can be opened.
    fn open(&self, request: &PlaybackRequest, renderer: Renderer) -> Result<Box<dyn OutputStream>>;
}

/// Output stream owned by a dedicated thread, stopped via a flag.
pub struct ThreadedOutput {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream for ThreadedOutput {
    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("output thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ThreadedOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Upper bound on quanta rendered per `pump`, so a converter that stops
/// producing cannot spin the output thread.
const MAX_QUANTA_PER_PUMP: usize = 16;

/// Renders at the timeline rate and converts to a device rate that differs.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
pub(crate) struct RateAdaptedFeed {
    renderer: Renderer,
    converter: RateConverter,
    producer: HeapProd<f32>,
    quantum: Vec<f32>,
    /// Device frames to keep queued (40 ms).
    target_fill: usize,
}

#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
impl RateAdaptedFeed {
    /// Returns the feed and the ring half the device callback drains.
    pub(crate) fn new(renderer: Renderer, device_rate: u32) -> Result<(Self, HeapCons<f32>)> {
        let render_rate = renderer.sample_rate();
        let quantum = (render_rate / 100).max(1) as usize;
        let converter = RateConverter::new(render_rate, device_rate, quantum)?;
        let target_fill = (device_rate / 25).max(1) as usize;
        let device_quantum = (device_rate / 100).max(1) as usize;
        let (producer, consumer) =
            HeapRb::<f32>::new(target_fill + 2 * device_quantum + 64).split();
        Ok((
            Self {
                renderer,
                converter,
                producer,
                quantum: vec![0.0; quantum],
                target_fill,
            },
            consumer,
        ))
    }

    /// Top the ring up to the target fill. Returns device frames queued.
    pub(crate) fn pump(&mut self) -> usize {
        let mut queued = 0;
        for _ in 0..MAX_QUANTA_PER_PUMP {
            if self.producer.occupied_len() >= self.target_fill {
                break;
            }
            self.renderer.render(&mut self.quantum);
            queued += self.producer.push_slice(&self.converter.process(&self.quantum));
        }
        queued
    }
}

/// Pop one mono frame per output frame; an empty ring plays silence.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
pub(crate) fn fill_from_feed(feed: &mut HeapCons<f32>, out: &mut [f32], channels: usize) {
    for frame in out.chunks_exact_mut(channels.max(1)) {
        frame.fill(feed.try_pop().unwrap_or(0.0));
    }
}

/// What a device callback pulls from.
#[cfg(feature = "audio-cpal")]
enum DeviceSource {
    Direct(Renderer),
    Converted(HeapCons<f32>),
}

#[cfg(feature = "audio-cpal")]
impl DeviceSource {
    fn fill(&mut self, out: &mut [f32], channels: usize) {
        match self {
            Self::Direct(renderer) => renderer.render_interleaved(out, channels),
            Self::Converted(feed) => fill_from_feed(feed, out, channels),
        }
    }
}

/// Output backend for the host's default audio API.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

#[cfg(feature = "audio-cpal")]
impl CpalOutput {
    fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = preferred {
            match host.output_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!("preferred output device '{}' not found, falling back", name);
                }
                Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
            }
        }
        host.default_output_device()
            .ok_or(ParleyError::NoDefaultOutputDevice)
    }

    /// Mono at the requested rate if possible, then any channel count at
    /// that rate, then the device's default config.
    fn select_config(device: &cpal::Device, rate: u32) -> Result<cpal::SupportedStreamConfig> {
        let wanted = SampleRate(rate);
        let ranges: Vec<_> = match device.supported_output_configs() {
            Ok(configs) => configs
                .filter(|r| r.min_sample_rate() <= wanted && r.max_sample_rate() >= wanted)
                .collect(),
            Err(e) => {
                warn!("failed to query output configs: {e}");
                Vec::new()
            }
        };
        if let Some(range) = ranges
            .iter()
            .find(|r| r.channels() == 1)
            .or_else(|| ranges.first())
        {
            return Ok(range.clone().with_sample_rate(wanted));
        }
        let fallback = device
            .default_output_config()
            .map_err(|e| ParleyError::Device(e.to_string()))?;
        info!(
            device_rate = fallback.sample_rate().0,
            playback_rate = rate,
            "output device refused playback rate, resampling"
        );
        Ok(fallback)
    }

    /// Build and start the stream. The feed is `Some` when the device runs
    /// at a different rate and must be pumped from the output thread.
    fn build(
        device: &cpal::Device,
        renderer: Renderer,
    ) -> Result<(cpal::Stream, Option<RateAdaptedFeed>)> {
        let rate = renderer.sample_rate();
        let supported = Self::select_config(device, rate)?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(sample_rate = device_rate, channels, "output config selected");

        let (mut source, mut feed) = if device_rate == rate {
            (DeviceSource::Direct(renderer), None)
        } else {
            let (feed, consumer) = RateAdaptedFeed::new(renderer, device_rate)?;
            (DeviceSource::Converted(consumer), Some(feed))
        };
        if let Some(feed) = feed.as_mut() {
            feed.pump();
        }

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| source.fill(data, channels),
                |err| error!("output stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::with_capacity(8192);
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info| {
                        scratch.resize(data.len(), 0.0);
                        source.fill(&mut scratch, channels);
                        for (dst, src) in data.iter_mut().zip(&scratch) {
                            *dst = crate::codec::sample_to_i16(*src);
                        }
                    },
                    |err| error!("output stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(ParleyError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ParleyError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ParleyError::AudioStream(e.to_string()))?;
        Ok((stream, feed))
    }
}

#[cfg(feature = "audio-cpal")]
impl OutputBackend for CpalOutput {
    fn open(&self, request: &PlaybackRequest, renderer: Renderer) -> Result<Box<dyn OutputStream>> {
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let request = request.clone();
        let thread_running = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("parley-output".into())
            .spawn(move || {
                let stream = Self::select_device(request.preferred_device.as_deref()).and_then(
                    |device| {
                        info!(
                            device = device.name().unwrap_or_default().as_str(),
                            "opening output device"
                        );
                        Self::build(&device, renderer)
                    },
                );
                let (stream, mut feed) = match stream {
                    Ok(built) => {
                        let _ = open_tx.send(Ok(()));
                        built
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                while thread_running.load(Ordering::Relaxed) {
                    match feed.as_mut() {
                        Some(feed) => {
                            feed.pump();
                            std::thread::sleep(std::time::Duration::from_millis(5));
                        }
                        None => std::thread::sleep(std::time::Duration::from_millis(20)),
                    }
                }
                // Stream drops here, releasing the device on this thread.
                drop(stream);
                info!("output device released");
            })
            .map_err(ParleyError::Io)?;

        let mut handle = ThreadedOutput {
            running,
            thread: Some(thread),
        };
        match open_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(handle)),
            Ok(Err(e)) => {
                handle.close();
                Err(e)
            }
            Err(_) => {
                handle.close();
                Err(ParleyError::AudioStream("output thread died unexpectedly".into()))
            }
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl OutputBackend for CpalOutput {
    fn open(&self, _request: &PlaybackRequest, _renderer: Renderer) -> Result<Box<dyn OutputStream>> {
        Err(ParleyError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{context::AudioContext, tap::AudioTap},
        buffering::block::AudioBuffer,
        playback::PlaybackScheduler,
    };

    const RATE: u32 = 24_000;

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(AudioContext::new(RATE), Arc::new(AudioTap::new(64)))
    }

    #[test]
    fn feed_converts_the_mix_to_a_48k_device() {
        let s = scheduler();
        s.enqueue(AudioBuffer::mono(vec![0.5; 12_000], RATE));
        let (mut feed, mut ring) = RateAdaptedFeed::new(s.renderer(), 48_000).unwrap();

        assert!(feed.pump() >= 1_920, "40 ms at 48 kHz queued");
        let rendered = s.context().clock().frames();
        assert!(rendered > 0 && rendered % 240 == 0, "whole 10 ms quanta, got {rendered}");

        let mut out = vec![0.0f32; 2 * 1_800];
        fill_from_feed(&mut ring, &mut out, 2);
        for frame in out[out.len() - 200..].chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
            approx::assert_abs_diff_eq!(frame[0], 0.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn full_ring_renders_nothing_more() {
        let s = scheduler();
        let (mut feed, _ring) = RateAdaptedFeed::new(s.renderer(), 44_100).unwrap();
        feed.pump();
        let rendered = s.context().clock().frames();
        assert_eq!(feed.pump(), 0);
        assert_eq!(s.context().clock().frames(), rendered);
    }

    #[test]
    fn drained_feed_plays_silence() {
        let (_producer, mut ring) = HeapRb::<f32>::new(8).split();
        let mut out = vec![9.0f32; 6];
        fill_from_feed(&mut ring, &mut out, 3);
        assert_eq!(out, vec![0.0; 6]);
    }
}
