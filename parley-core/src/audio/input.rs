//! Microphone input backends.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a mutex or perform I/O. It only
//! downmixes to mono and writes into an SPSC ring buffer producer whose
//! `push_slice` is lock-free. Block framing, encoding and sending happen on
//! the capture worker thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `InputStream` handles are therefore opened, held and dropped on
//! the capture worker thread.

use std::sync::{atomic::AtomicBool, Arc};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    buffering::AudioProducer,
    error::{ParleyError, Result},
};
#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;

/// What the capture engine asks a device for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Desired capture rate (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Desired channel count. Default: 1.
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Exact device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            preferred_device: None,
        }
    }
}

/// A live, thread-bound input stream. Dropping it releases the device.
pub trait InputStream {
    /// Rate at which samples actually arrive in the ring (Hz).
    fn sample_rate(&self) -> u32;
}

/// Acquires microphones.
pub trait InputBackend: Send + Sync + 'static {
    /// Open a device and start pushing mono f32 samples into `producer`
    /// while `running` is `true`.
    ///
    /// Called on the capture worker thread; the returned handle is dropped
    /// on that same thread.
    ///
    /// # Errors
    /// A device-class `ParleyError` when permission is denied or no device
    /// is available.
    fn open(
        &self,
        request: &CaptureRequest,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>>;
}

/// Input backend for the host's default audio API.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalInput;

#[cfg(feature = "audio-cpal")]
struct CpalInputStream {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(feature = "audio-cpal")]
impl CpalInput {
    fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();

        if let Some(preferred_name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) = devices
                        .find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!(
                        "preferred input device '{}' not found, falling back",
                        preferred_name
                    );
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        if let Some(default) = host.default_input_device() {
            return Ok(default);
        }

        let mut devices = host
            .input_devices()
            .map_err(|e| ParleyError::Device(e.to_string()))?;
        let fallback = devices.next().ok_or(ParleyError::NoDefaultInputDevice)?;
        warn!("no default input device, falling back to first available input");
        Ok(fallback)
    }

    /// Prefer a config at the requested rate; otherwise the device default.
    fn select_config(
        device: &cpal::Device,
        request: &CaptureRequest,
    ) -> Result<cpal::SupportedStreamConfig> {
        let wanted = SampleRate(request.sample_rate);
        if let Ok(mut ranges) = device.supported_input_configs() {
            if let Some(range) = ranges.find(|r| {
                r.channels() == request.channels
                    && r.min_sample_rate() <= wanted
                    && r.max_sample_rate() >= wanted
            }) {
                return Ok(range.with_sample_rate(wanted));
            }
        }
        device
            .default_input_config()
            .map_err(|e| ParleyError::Device(e.to_string()))
    }
}

#[cfg(feature = "audio-cpal")]
impl InputBackend for CpalInput {
    fn open(
        &self,
        request: &CaptureRequest,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        let device = Self::select_device(request.preferred_device.as_deref())?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );
        if request.echo_cancellation || request.noise_suppression || request.auto_gain_control {
            info!(
                echo_cancellation = request.echo_cancellation,
                noise_suppression = request.noise_suppression,
                auto_gain_control = request.auto_gain_control,
                "voice processing delegated to the platform input path"
            );
        }

        let supported = Self::select_config(&device, request)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels as usize;
        let mut mix_buf: Vec<f32> = Vec::with_capacity(4096);
        let mut push_mono = move |frames: usize, sample: &dyn Fn(usize) -> f32| {
            mix_buf.resize(frames, 0.0);
            for (f, slot) in mix_buf.iter_mut().enumerate() {
                let base = f * ch;
                let mut sum = 0f32;
                for c in 0..ch {
                    sum += sample(base + c);
                }
                *slot = sum / ch as f32;
            }
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
            }
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(data.len() / ch, &|i| data[i]);
                    },
                    |err| error!("input stream error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(data.len() / ch, &|i| data[i] as f32 / 32_768.0);
                    },
                    |err| error!("input stream error: {err}"),
                    None,
                )
            }
            SampleFormat::U8 => {
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(data.len() / ch, &|i| (data[i] as f32 - 128.0) / 128.0);
                    },
                    |err| error!("input stream error: {err}"),
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

        Ok(Box::new(CpalInputStream {
            _stream: stream,
            sample_rate,
        }))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl InputBackend for CpalInput {
    fn open(
        &self,
        _request: &CaptureRequest,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        Err(ParleyError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
