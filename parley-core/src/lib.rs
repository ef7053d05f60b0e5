//! # parley-core
//!
//! Real-time voice conversation pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputBackend → SPSC RingBuffer → capture worker ─► input tap ─► Analyser
//!                                                     │
//!                                           PcmBlock (256 @ 16 kHz)
//!                                                     │
//!                                    codec::encode → TransportHandle::send
//!
//! Transport events → epoch-tagged queue → SessionController
//!                                              │
//!                          codec::decode_chunk → PlaybackScheduler::enqueue
//!                                                     │
//!                         Renderer ◄── OutputBackend ─┴─► output tap ─► Analyser
//! ```
//!
//! The device callbacks never allocate or block. Framing, encoding and
//! decoding happen on the capture worker and the session's event loop.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analyser;
pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;
pub mod transport;

// Convenience re-exports for downstream crates
pub use analyser::{Analyser, AnalyserConfig, EnergyLevels};
pub use audio::device::{list_input_devices, list_output_devices, DeviceInfo};
pub use buffering::block::{AudioBuffer, PcmBlock};
pub use capture::{CaptureEngine, CaptureState};
pub use codec::OutboundFrame;
pub use error::{ErrorKind, ParleyError};
pub use ipc::events::{SessionState, SessionStatusEvent};
pub use playback::{PlaybackScheduler, Renderer, ScheduledSource};
pub use session::{DiagnosticsSnapshot, SessionConfig, SessionController};
pub use transport::{
    ConnectConfig, LoopbackTransport, Transport, TransportEvent, TransportEvents,
    TransportHandle,
};
