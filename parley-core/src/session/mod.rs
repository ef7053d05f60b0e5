//! `SessionController` — ties capture, playback and the transport together.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionController::new()          state = Disconnected
//!     └─► open()                    Connecting ──opened──► Open
//!             │                          └──connect error──► Disconnected
//!             ├─► reset()           close old link, flush playback, open() again
//!             └─► close()           terminal Disconnected
//! ```
//!
//! ## Event flow
//!
//! Transports never call into the controller directly. They report through
//! `TransportEvents`, which queues each event tagged with the connection
//! epoch. `run()` (or `dispatch_pending()`) drains the queue and drops every
//! event whose epoch is not the current one, so a connection replaced by
//! `reset()` or `close()` can no longer touch playback or status.
//!
//! Outbound audio takes the short path: the capture worker's block sink
//! encodes each block and sends it on whatever connection is open at that
//! moment. With no open connection the block is dropped.

pub mod diagnostics;

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{
    analyser::{Analyser, AnalyserConfig},
    audio::{
        context::{AudioContext, FrameClock},
        input::{CaptureRequest, InputBackend},
        output::{OutputBackend, OutputStream, PlaybackRequest},
        tap::AudioTap,
    },
    buffering::block::PcmBlock,
    capture::CaptureEngine,
    codec,
    error::{ParleyError, Result},
    ipc::events::{SessionState, SessionStatusEvent},
    playback::PlaybackScheduler,
    transport::{
        ConnectConfig, Queued, ServerMessage, Transport, TransportEvent, TransportEvents,
        TransportHandle,
    },
};

/// Status broadcast capacity; slow subscribers lag rather than block.
const STATUS_CAP: usize = 64;

/// Configuration for `SessionController`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Samples per outbound block. Default: 256.
    pub block_size: usize,
    pub capture: CaptureRequest,
    pub playback: PlaybackRequest,
    /// Channel count of inbound model audio. Default: 1.
    pub playback_channels: u16,
    pub analyser: AnalyserConfig,
    /// Remote model identifier, passed through to the transport.
    pub model: String,
    /// Prebuilt voice name, passed through to the transport.
    pub voice: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            capture: CaptureRequest::default(),
            playback: PlaybackRequest::default(),
            playback_channels: 1,
            analyser: AnalyserConfig::default(),
            model: "gemini-2.5-flash-preview-native-audio-dialog".into(),
            voice: "Orus".into(),
        }
    }
}

impl SessionConfig {
    fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
        }
    }
}

/// The one live connection and the epoch it belongs to.
#[derive(Default)]
struct Link {
    state: SessionState,
    epoch: u64,
    handle: Option<Arc<dyn TransportHandle>>,
}

impl Link {
    /// Invalidate the current connection and hand back its handle.
    fn retire(&mut self) -> Option<Arc<dyn TransportHandle>> {
        self.epoch += 1;
        self.state = SessionState::Disconnected;
        self.handle.take()
    }
}

/// State shared with the capture worker's block sink.
struct Shared {
    link: Mutex<Link>,
    status: Mutex<String>,
    error: Mutex<Option<String>>,
    diagnostics: SessionDiagnostics,
    status_tx: broadcast::Sender<SessionStatusEvent>,
}

impl Shared {
    fn state(&self) -> SessionState {
        self.link.lock().state
    }

    fn set_status(&self, detail: impl Into<String>) {
        let detail = detail.into();
        *self.status.lock() = detail.clone();
        let _ = self.status_tx.send(SessionStatusEvent {
            state: self.state(),
            detail: Some(detail),
        });
    }

    fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        *self.error.lock() = Some(message.clone());
        let _ = self.status_tx.send(SessionStatusEvent {
            state: self.state(),
            detail: Some(message),
        });
    }

    /// Encode one captured block and send it on the open connection.
    fn send_block(&self, block: &PcmBlock) {
        SessionDiagnostics::bump(&self.diagnostics.blocks_captured);
        let handle = {
            let link = self.link.lock();
            if link.state.accepts_audio() {
                link.handle.clone()
            } else {
                None
            }
        };
        let Some(handle) = handle else {
            SessionDiagnostics::bump(&self.diagnostics.frames_dropped);
            debug!(samples = block.len(), "no open session, block dropped");
            return;
        };

        let frame = codec::encode(block);
        match handle.send(&frame) {
            Ok(()) => SessionDiagnostics::bump(&self.diagnostics.frames_sent),
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.send_failures);
                warn!("send failed, block dropped: {e}");
                self.set_error(e.to_string());
            }
        }
    }
}

/// Owns one conversation: its audio graphs, its capture engine, its playback
/// scheduler and at most one transport connection.
///
/// `Send + Sync`; wrap in `Arc` to run `run()` on a task while other tasks
/// call `start_capture()` / `reset()` / `close()`.
pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    output_backend: Arc<dyn OutputBackend>,
    input_context: AudioContext,
    input_tap: Arc<AudioTap>,
    capture: CaptureEngine,
    scheduler: Arc<PlaybackScheduler>,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<Queued>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Queued>>,
    output: Mutex<Option<Box<dyn OutputStream>>>,
    closed: AtomicBool,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        input: Arc<dyn InputBackend>,
        output: Arc<dyn OutputBackend>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let tap_capacity = config.analyser.normalized().fft_size * 4;
        let input_context = AudioContext::new(config.capture.sample_rate);
        let output_context = AudioContext::new(config.playback.sample_rate);
        let input_tap = Arc::new(AudioTap::new(tap_capacity));
        let output_tap = Arc::new(AudioTap::new(tap_capacity));

        let capture = CaptureEngine::new(
            input,
            config.capture.clone(),
            config.block_size,
            Arc::clone(&input_tap),
        );
        let scheduler = Arc::new(PlaybackScheduler::new(output_context, output_tap));

        let (status_tx, _) = broadcast::channel(STATUS_CAP);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            transport,
            output_backend: output,
            input_context,
            input_tap,
            capture,
            scheduler,
            shared: Arc::new(Shared {
                link: Mutex::new(Link::default()),
                status: Mutex::new(String::new()),
                error: Mutex::new(None),
                diagnostics: SessionDiagnostics::default(),
                status_tx,
            }),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            output: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Connect the transport. No-op while connecting or open.
    ///
    /// # Errors
    /// The transport's error if it cannot even start connecting; the session
    /// is left `Disconnected` with the error recorded. `NotConnected` once
    /// the session has been closed.
    pub fn open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ParleyError::NotConnected);
        }
        let (epoch, stale) = {
            let mut link = self.shared.link.lock();
            if matches!(link.state, SessionState::Connecting | SessionState::Open) {
                return Ok(());
            }
            let stale = link.retire();
            link.state = SessionState::Connecting;
            (link.epoch, stale)
        };
        if let Some(stale) = stale {
            stale.close();
        }
        self.shared.set_status("Connecting...");
        info!(epoch, model = self.config.model.as_str(), "opening session");

        let events = TransportEvents::new(epoch, self.events_tx.clone());
        match self.transport.connect(&self.config.connect_config(), events) {
            Ok(handle) => {
                let mut link = self.shared.link.lock();
                if link.epoch == epoch {
                    link.handle = Some(handle);
                } else {
                    // Replaced while connecting.
                    drop(link);
                    handle.close();
                }
                Ok(())
            }
            Err(e) => {
                {
                    let mut link = self.shared.link.lock();
                    if link.epoch == epoch {
                        link.state = SessionState::Disconnected;
                    }
                }
                warn!("transport connect failed: {e}");
                self.shared.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Close the current connection, flush playback, and connect again.
    ///
    /// Events from the replaced connection are ignored from here on.
    ///
    /// # Errors
    /// As `open()`.
    pub fn reset(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ParleyError::NotConnected);
        }
        let old = self.shared.link.lock().retire();
        if let Some(handle) = old {
            handle.close();
        }
        self.scheduler.reset();
        *self.shared.error.lock() = None;
        info!("session reset");

        self.open()?;
        self.shared.set_status("Session cleared.");
        Ok(())
    }

    /// Stop capture, close the transport and the output device. Terminal and
    /// idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.capture.stop();
        let handle = self.shared.link.lock().retire();
        if let Some(handle) = handle {
            handle.close();
        }
        self.scheduler.reset();
        if let Some(mut stream) = self.output.lock().take() {
            stream.close();
        }
        let _ = self.events_tx.send(Queued::Shutdown);
        self.shared.set_status("Session closed.");
        info!("session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Capture ──────────────────────────────────────────────────────────────

    /// Start the speakers (if not yet running) and the microphone.
    ///
    /// A speaker failure is reported but does not stop capture.
    ///
    /// # Errors
    /// A device-class `ParleyError` if the microphone cannot be opened; also
    /// recorded as status text.
    pub fn start_capture(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ParleyError::NotConnected);
        }
        if self.capture.is_capturing() {
            return Ok(());
        }
        self.ensure_output();

        self.shared.set_status("Requesting microphone access...");
        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(self.input_context.clock());
        let sink = Box::new(move |block: PcmBlock| {
            clock.advance(block.len() as u64);
            shared.send_block(&block);
        });

        match self.capture.start(sink) {
            Ok(()) => {
                self.shared.set_status("Recording... capturing PCM chunks.");
                Ok(())
            }
            Err(e) => {
                self.shared.set_status(format!("Error: {e}"));
                self.shared.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Release the microphone. Safe to call at any time.
    pub fn stop_capture(&self) {
        if !self.capture.is_capturing() {
            self.capture.stop();
            return;
        }
        self.shared.set_status("Stopping recording...");
        self.capture.stop();
        self.shared.set_status("Recording stopped.");
    }

    fn ensure_output(&self) {
        let mut output = self.output.lock();
        if output.is_some() {
            return;
        }
        match self
            .output_backend
            .open(&self.config.playback, self.scheduler.renderer())
        {
            Ok(stream) => *output = Some(stream),
            Err(e) => {
                warn!("speaker unavailable: {e}");
                self.shared.set_error(e.to_string());
            }
        }
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    /// Handle transport events until `close()`.
    pub async fn run(&self) {
        let mut rx = self.events_rx.lock().await;
        while !self.closed.load(Ordering::SeqCst) {
            match rx.recv().await {
                Some(Queued::Transport { epoch, event }) => self.handle_event(epoch, event),
                Some(Queued::Shutdown) | None => break,
            }
        }
        debug!("session event loop finished");
    }

    /// Handle every event queued so far without waiting. Returns how many
    /// were handled (stale ones included). Returns 0 while `run()` is active.
    pub fn dispatch_pending(&self) -> usize {
        let Ok(mut rx) = self.events_rx.try_lock() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(queued) = rx.try_recv() {
            match queued {
                Queued::Transport { epoch, event } => self.handle_event(epoch, event),
                Queued::Shutdown => break,
            }
            handled += 1;
        }
        handled
    }

    fn handle_event(&self, epoch: u64, event: TransportEvent) {
        let current = self.shared.link.lock().epoch;
        if epoch != current {
            debug!(epoch, current, "stale transport event dropped");
            return;
        }
        match event {
            TransportEvent::Opened => {
                {
                    let mut link = self.shared.link.lock();
                    if link.epoch != epoch || link.state != SessionState::Connecting {
                        return;
                    }
                    link.state = SessionState::Open;
                }
                info!(epoch, "session open");
                self.shared.set_status("Opened");
            }
            TransportEvent::Message(message) => self.handle_message(&message),
            TransportEvent::Error(message) => {
                warn!("transport error: {message}");
                self.shared.set_error(message);
            }
            TransportEvent::Closed(reason) => {
                {
                    let mut link = self.shared.link.lock();
                    if link.epoch != epoch {
                        return;
                    }
                    link.state = SessionState::Closed;
                    link.handle = None;
                }
                info!(reason = reason.as_str(), "transport closed");
                self.shared.set_status(format!("Close: {reason}"));
            }
        }
    }

    fn handle_message(&self, message: &ServerMessage) {
        let diagnostics = &self.shared.diagnostics;
        for payload in message.audio_payloads() {
            SessionDiagnostics::bump(&diagnostics.chunks_received);
            match codec::decode_chunk(
                payload,
                self.config.playback.sample_rate,
                self.config.playback_channels,
            ) {
                Ok(buffer) => {
                    self.scheduler.enqueue(buffer);
                    SessionDiagnostics::bump(&diagnostics.chunks_scheduled);
                }
                Err(e) => {
                    SessionDiagnostics::bump(&diagnostics.chunks_dropped);
                    warn!("inbound chunk dropped: {e}");
                    self.shared.set_error(e.to_string());
                }
            }
        }
        if message.is_interrupted() {
            self.scheduler.interrupt();
            SessionDiagnostics::bump(&diagnostics.interruptions);
        }
    }

    // ── Observation ──────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Latest status text.
    pub fn status(&self) -> String {
        self.shared.status.lock().clone()
    }

    /// Latest error text, cleared by `reset()`.
    pub fn error(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    /// A fresh analyser over the captured signal.
    pub fn input_analyser(&self) -> Analyser {
        Analyser::new(Arc::clone(&self.input_tap), self.config.analyser)
    }

    /// A fresh analyser over the rendered playback mix.
    pub fn output_analyser(&self) -> Analyser {
        Analyser::new(Arc::clone(self.scheduler.tap()), self.config.analyser)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn input_context(&self) -> &AudioContext {
        &self.input_context
    }

    pub fn output_clock(&self) -> &Arc<FrameClock> {
        self.scheduler.context().clock()
    }

    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.scheduler
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::input::InputStream,
        buffering::AudioProducer,
        playback::Renderer,
        transport::wire::{InlineData, ModelTurn, Part, ServerContent},
    };

    struct DeniedInput;

    impl InputBackend for DeniedInput {
        fn open(
            &self,
            _request: &CaptureRequest,
            _producer: AudioProducer,
            _running: Arc<std::sync::atomic::AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            Err(ParleyError::Device("no microphone in tests".into()))
        }
    }

    struct NoOutput;

    impl OutputBackend for NoOutput {
        fn open(
            &self,
            _request: &PlaybackRequest,
            _renderer: Renderer,
        ) -> Result<Box<dyn OutputStream>> {
            Err(ParleyError::NoDefaultOutputDevice)
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        closes: std::sync::atomic::AtomicUsize,
    }

    impl TransportHandle for Recorder {
        fn send(&self, frame: &codec::OutboundFrame) -> Result<()> {
            self.sent.lock().push(frame.data.clone());
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Keeps every connection's events so tests can fire them late.
    #[derive(Default)]
    struct ManualTransport {
        connections: Mutex<Vec<(TransportEvents, Arc<Recorder>)>>,
    }

    impl Transport for ManualTransport {
        fn connect(
            &self,
            _config: &ConnectConfig,
            events: TransportEvents,
        ) -> Result<Arc<dyn TransportHandle>> {
            let handle = Arc::new(Recorder::default());
            self.connections.lock().push((events, Arc::clone(&handle)));
            Ok(handle)
        }
    }

    impl ManualTransport {
        fn events(&self, index: usize) -> TransportEvents {
            self.connections.lock()[index].0.clone()
        }

        fn handle(&self, index: usize) -> Arc<Recorder> {
            Arc::clone(&self.connections.lock()[index].1)
        }
    }

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn connect(
            &self,
            _config: &ConnectConfig,
            _events: TransportEvents,
        ) -> Result<Arc<dyn TransportHandle>> {
            Err(ParleyError::Transport("network unreachable".into()))
        }
    }

    fn controller(transport: Arc<dyn Transport>) -> SessionController {
        SessionController::new(
            SessionConfig::default(),
            Arc::new(DeniedInput),
            Arc::new(NoOutput),
            transport,
        )
    }

    fn audio(samples: &[f32]) -> ServerMessage {
        ServerMessage::audio(codec::encode_samples(samples).data)
    }

    #[test]
    fn open_reaches_open_on_transport_opened() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        assert_eq!(s.state(), SessionState::Connecting);
        s.open().unwrap();
        assert_eq!(t.connections.lock().len(), 1, "open while connecting is a no-op");

        t.events(0).opened();
        assert_eq!(s.dispatch_pending(), 1);
        assert_eq!(s.state(), SessionState::Open);
        assert_eq!(s.status(), "Opened");
    }

    #[test]
    fn connect_failure_leaves_disconnected_with_error() {
        let s = controller(Arc::new(RefusingTransport));
        let err = s.open().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(s.error().unwrap().contains("network unreachable"));
    }

    #[test]
    fn blocks_are_dropped_unless_open() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        let block = PcmBlock::new(vec![0.1; 256], 16_000);

        s.shared.send_block(&block);
        s.open().unwrap();
        s.shared.send_block(&block);
        t.events(0).opened();
        s.dispatch_pending();
        s.shared.send_block(&block);

        let d = s.diagnostics_snapshot();
        assert_eq!(d.blocks_captured, 3);
        assert_eq!(d.frames_dropped, 2);
        assert_eq!(d.frames_sent, 1);
        assert_eq!(t.handle(0).sent.lock().len(), 1);
    }

    #[test]
    fn inbound_audio_is_scheduled_back_to_back() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        let events = t.events(0);
        events.opened();
        events.message(audio(&[0.2; 2_400]));
        events.message(audio(&[0.2; 2_400]));
        s.dispatch_pending();

        let sources = s.scheduler().active_sources();
        assert_eq!(sources.len(), 2);
        approx::assert_abs_diff_eq!(sources[0].start_time, 0.0);
        approx::assert_abs_diff_eq!(sources[1].start_time, 0.1, epsilon = 1e-9);
        assert_eq!(s.diagnostics_snapshot().chunks_scheduled, 2);
    }

    #[test]
    fn every_audio_part_is_enqueued_before_the_interruption() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        let part = |data: String| Part {
            inline_data: Some(InlineData {
                data,
                mime_type: None,
            }),
            text: None,
        };
        let message = ServerMessage {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![
                        part(codec::encode_samples(&[0.1; 240]).data),
                        part(codec::encode_samples(&[0.1; 240]).data),
                    ],
                }),
                interrupted: Some(true),
            }),
        };
        t.events(0).message(message);
        s.dispatch_pending();

        let d = s.diagnostics_snapshot();
        assert_eq!(d.chunks_scheduled, 2);
        assert_eq!(d.interruptions, 1);
        assert!(s.scheduler().is_idle());
        assert_eq!(s.scheduler().next_start_time(), 0.0);
    }

    #[test]
    fn malformed_chunk_is_dropped_without_touching_the_cursor() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        let events = t.events(0);
        events.message(audio(&[0.2; 2_400]));
        events.message(ServerMessage::audio("%%%not base64%%%"));
        s.dispatch_pending();

        approx::assert_abs_diff_eq!(s.scheduler().next_start_time(), 0.1, epsilon = 1e-9);
        assert_eq!(s.diagnostics_snapshot().chunks_dropped, 1);
        assert!(s.error().is_some());
    }

    #[test]
    fn reset_silences_the_replaced_connection() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        let old = t.events(0);
        old.opened();
        s.dispatch_pending();

        s.reset().unwrap();
        assert_eq!(t.handle(0).closes.load(Ordering::SeqCst), 1);
        assert_eq!(s.status(), "Session cleared.");

        old.message(audio(&[0.5; 480]));
        old.closed("late close");
        s.dispatch_pending();
        assert!(s.scheduler().is_idle(), "stale audio must not play");
        assert_eq!(s.state(), SessionState::Connecting);

        t.events(1).opened();
        s.dispatch_pending();
        assert_eq!(s.state(), SessionState::Open);
    }

    #[test]
    fn remote_close_moves_to_closed() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        t.events(0).opened();
        t.events(0).closed("going away");
        s.dispatch_pending();
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.status(), "Close: going away");

        s.open().unwrap();
        assert_eq!(t.connections.lock().len(), 2);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let t = Arc::new(ManualTransport::default());
        let s = controller(t.clone());
        s.open().unwrap();
        s.close();
        s.close();
        assert_eq!(t.handle(0).closes.load(Ordering::SeqCst), 1);
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(s.open().is_err());
        assert!(s.reset().is_err());
    }

    #[test]
    fn denied_microphone_is_reported() {
        let s = controller(Arc::new(ManualTransport::default()));
        let mut status = s.subscribe_status();
        assert!(s.start_capture().is_err());
        assert!(s.status().starts_with("Error:"));
        assert!(s.error().is_some());
        assert!(!s.capture().is_capturing());

        let mut details = Vec::new();
        while let Ok(event) = status.try_recv() {
            details.extend(event.detail);
        }
        assert!(details.iter().any(|d| d == "Requesting microphone access..."));
    }
}
