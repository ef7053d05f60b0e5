//! `CaptureEngine` — microphone lifecycle and block delivery.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──► Requesting ──device granted──► Capturing ──stop()──► Idle
//!                        │
//!                        └──denied / no device──► Idle  (Err(Device…))
//! ```
//!
//! `start()` while Capturing is a no-op; `stop()` is idempotent and safe
//! from any state, including a half-finished start.
//!
//! ## Threading
//!
//! Device streams are `!Send`, so the stream is opened *inside* the worker
//! thread and dropped there too. A bounded(1) channel carries the open
//! result back to `start()`, which blocks until the platform grants or
//! refuses the device.

pub mod worker;

pub use worker::{BlockSink, CaptureDiagnostics};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    audio::{
        input::{CaptureRequest, InputBackend},
        tap::AudioTap,
    },
    buffering::create_audio_ring,
    error::{ParleyError, Result},
};

/// Capture engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    /// Waiting on device permission / availability.
    Requesting,
    Capturing,
}

pub struct CaptureEngine {
    backend: Arc<dyn InputBackend>,
    request: CaptureRequest,
    block_size: usize,
    tap: Arc<AudioTap>,
    state: Mutex<CaptureState>,
    /// `true` while the device callback and worker should run.
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl CaptureEngine {
    /// `tap` receives every emitted block, for the input analyser.
    pub fn new(
        backend: Arc<dyn InputBackend>,
        request: CaptureRequest,
        block_size: usize,
        tap: Arc<AudioTap>,
    ) -> Self {
        Self {
            backend,
            request,
            block_size: block_size.max(1),
            tap,
            state: Mutex::new(CaptureState::Idle),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn diagnostics(&self) -> &Arc<CaptureDiagnostics> {
        &self.diagnostics
    }

    /// Acquire the microphone and start delivering blocks to `sink`.
    ///
    /// Blocks until the device is confirmed open (or refused).
    ///
    /// # Errors
    /// A device-class `ParleyError` when permission is denied, no device is
    /// available, the device rate cannot be converted, or `stop()` cancelled
    /// the request. The engine is back in `Idle` with nothing attached.
    pub fn start(&self, sink: BlockSink) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != CaptureState::Idle {
                info!(state = ?*state, "capture already active");
                return Ok(());
            }
            *state = CaptureState::Requesting;
        }

        // A previous worker may still be winding down after stop().
        self.join_worker();
        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let (producer, consumer) = create_audio_ring();
        let backend = Arc::clone(&self.backend);
        let request = self.request.clone();
        let running = Arc::clone(&self.running);
        let tap = Arc::clone(&self.tap);
        let diagnostics = Arc::clone(&self.diagnostics);
        let block_size = self.block_size;

        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let spawned = std::thread::Builder::new()
            .name("parley-capture".into())
            .spawn(move || {
                // ── Open device (must happen on THIS thread — streams are !Send) ──
                let stream = match backend.open(&request, producer, Arc::clone(&running)) {
                    Ok(s) => s,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let device_rate = stream.sample_rate();

                // The converter must exist before start() reports success.
                let worker = match worker::Worker::new(worker::WorkerContext {
                    consumer,
                    running: Arc::clone(&running),
                    device_sample_rate: device_rate,
                    capture_sample_rate: request.sample_rate,
                    block_size,
                    tap,
                    sink,
                    diagnostics,
                }) {
                    Ok(w) => w,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        drop(stream);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = open_tx.send(Ok(device_rate));
                worker.run();

                // Stream drops here, releasing the device on this thread.
                drop(stream);
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.abort_start();
                return Err(ParleyError::Io(e));
            }
        };
        *self.worker.lock() = Some(handle);

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                {
                    let mut state = self.state.lock();
                    if *state == CaptureState::Requesting {
                        *state = CaptureState::Capturing;
                        info!(device_rate = rate, "capture started");
                        return Ok(());
                    }
                }
                // stop() ran while the device was opening.
                self.abort_start();
                Err(ParleyError::Device(
                    "capture stopped before the microphone opened".into(),
                ))
            }
            Ok(Err(e)) => {
                warn!("microphone unavailable: {e}");
                self.abort_start();
                Err(e)
            }
            Err(_) => {
                self.abort_start();
                Err(ParleyError::Device("capture worker died before opening the device".into()))
            }
        }
    }

    /// Stop capture and release the device. Safe to call in any state.
    pub fn stop(&self) {
        let was = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, CaptureState::Idle)
        };
        self.running.store(false, Ordering::SeqCst);
        self.join_worker();
        if was != CaptureState::Idle {
            info!(
                blocks = self.diagnostics.blocks_emitted(),
                "capture stopped"
            );
        }
    }

    fn abort_start(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_worker();
        *self.state.lock() = CaptureState::Idle;
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // stop() from inside the block sink; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                warn!("capture worker panicked");
            }
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::input::InputStream,
        buffering::{block::PcmBlock, AudioProducer, Producer},
    };
    use std::time::{Duration, Instant};

    struct ScriptedStream(u32);

    impl InputStream for ScriptedStream {
        fn sample_rate(&self) -> u32 {
            self.0
        }
    }

    struct ScriptedInput(Vec<f32>);

    impl InputBackend for ScriptedInput {
        fn open(
            &self,
            request: &CaptureRequest,
            mut producer: AudioProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            producer.push_slice(&self.0);
            Ok(Box::new(ScriptedStream(request.sample_rate)))
        }
    }

    struct DeniedInput;

    impl InputBackend for DeniedInput {
        fn open(
            &self,
            _request: &CaptureRequest,
            _producer: AudioProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            Err(ParleyError::Device("permission denied".into()))
        }
    }

    /// Reports a device rate no converter accepts.
    struct ZeroRateInput;

    impl InputBackend for ZeroRateInput {
        fn open(
            &self,
            _request: &CaptureRequest,
            _producer: AudioProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            Ok(Box::new(ScriptedStream(0)))
        }
    }

    /// Holds the device request open until the test releases it.
    struct GatedInput {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl InputBackend for GatedInput {
        fn open(
            &self,
            request: &CaptureRequest,
            _producer: AudioProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(Box::new(ScriptedStream(request.sample_rate)))
        }
    }

    fn engine(backend: impl InputBackend) -> CaptureEngine {
        CaptureEngine::new(
            Arc::new(backend),
            CaptureRequest::default(),
            256,
            Arc::new(AudioTap::new(128)),
        )
    }

    fn collecting_sink() -> (BlockSink, Arc<Mutex<Vec<PcmBlock>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        (Box::new(move |b| out.lock().push(b)), seen)
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(2), "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn emits_whole_blocks_in_order() {
        let samples: Vec<f32> = (0..1_000).map(|i| i as f32 / 1_000.0).collect();
        let e = engine(ScriptedInput(samples.clone()));
        let (sink, seen) = collecting_sink();

        e.start(sink).expect("scripted device opens");
        assert_eq!(e.state(), CaptureState::Capturing);
        wait_for(|| seen.lock().len() == 3);
        e.stop();

        let blocks = seen.lock();
        assert_eq!(blocks.len(), 3, "232 trailing samples never form a block");
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.len(), 256);
            assert_eq!(block.sample_rate(), 16_000);
            assert_eq!(block.samples(), &samples[i * 256..(i + 1) * 256]);
        }
        assert_eq!(e.diagnostics().blocks_emitted(), 3);
    }

    #[test]
    fn start_while_capturing_is_a_no_op() {
        let e = engine(ScriptedInput(vec![0.0; 256]));
        let (sink, seen) = collecting_sink();
        e.start(sink).unwrap();
        let (second, second_seen) = collecting_sink();
        e.start(second).unwrap();
        wait_for(|| seen.lock().len() == 1);
        e.stop();
        assert!(second_seen.lock().is_empty());
    }

    #[test]
    fn denied_device_returns_to_idle() {
        let e = engine(DeniedInput);
        let (sink, _) = collecting_sink();
        let err = e.start(sink).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Device);
        assert_eq!(e.state(), CaptureState::Idle);
        assert!(e.worker.lock().is_none());
        assert!(!e.running.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_is_idempotent_and_safe_from_idle() {
        let e = engine(ScriptedInput(Vec::new()));
        e.stop();
        let (sink, _) = collecting_sink();
        e.start(sink).unwrap();
        e.stop();
        e.stop();
        assert_eq!(e.state(), CaptureState::Idle);
    }

    #[test]
    fn emitted_blocks_reach_the_tap() {
        let tap = Arc::new(AudioTap::new(256));
        let e = CaptureEngine::new(
            Arc::new(ScriptedInput(vec![0.75; 256])),
            CaptureRequest::default(),
            256,
            Arc::clone(&tap),
        );
        let (sink, seen) = collecting_sink();
        e.start(sink).unwrap();
        wait_for(|| seen.lock().len() == 1);
        e.stop();
        let mut window = [0.0f32; 4];
        tap.snapshot(&mut window);
        assert_eq!(window, [0.75; 4]);
    }

    #[test]
    fn unconvertible_device_rate_fails_start() {
        let e = engine(ZeroRateInput);
        let (sink, seen) = collecting_sink();
        let err = e.start(sink).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Device);
        assert_eq!(e.state(), CaptureState::Idle);
        assert!(e.worker.lock().is_none());
        assert!(!e.running.load(Ordering::SeqCst));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn stop_while_requesting_cancels_start() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let e = Arc::new(engine(GatedInput {
            entered: entered_tx,
            release: release_rx,
        }));

        let starter = {
            let e = Arc::clone(&e);
            std::thread::spawn(move || {
                let (sink, _) = collecting_sink();
                e.start(sink)
            })
        };
        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("device requested");
        assert_eq!(e.state(), CaptureState::Requesting);

        let stopper = {
            let e = Arc::clone(&e);
            std::thread::spawn(move || e.stop())
        };
        wait_for(|| e.state() == CaptureState::Idle);
        release_tx.send(()).unwrap();
        stopper.join().unwrap();

        let err = starter.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Device);
        assert_eq!(e.state(), CaptureState::Idle);
        assert!(!e.is_capturing());
        assert!(e.worker.lock().is_none());
        assert!(!e.running.load(Ordering::SeqCst));
    }
}
