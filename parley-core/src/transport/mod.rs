//! Seam to the remote conversational model.
//!
//! A `Transport` opens connections; each connection reports back through a
//! `TransportEvents` handle instead of ad-hoc callbacks. Every event is
//! tagged with the epoch of the connection that produced it and queued for
//! the owning `SessionController`, which drops events from any epoch but the
//! current one. That is what keeps a replaced connection from acting after
//! `reset()`.

pub mod loopback;
pub mod wire;

pub use loopback::LoopbackTransport;
pub use wire::{RealtimeInput, ServerMessage};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{codec::OutboundFrame, error::Result};

/// Parameters passed to `Transport::connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Remote model identifier.
    pub model: String,
    /// Prebuilt voice name for synthesized speech.
    pub voice: String,
}

/// Something the transport reports about its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(ServerMessage),
    Error(String),
    Closed(String),
}

/// Item on a controller's event queue.
#[derive(Debug)]
pub(crate) enum Queued {
    Transport { epoch: u64, event: TransportEvent },
    Shutdown,
}

pub(crate) type EventQueue = mpsc::UnboundedSender<Queued>;

/// Callback surface handed to a transport at connect time.
///
/// Cheap to clone; every method is non-blocking and callable from any
/// thread. Methods return `false` once the controller is gone.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    epoch: u64,
    queue: EventQueue,
}

impl TransportEvents {
    pub(crate) fn new(epoch: u64, queue: EventQueue) -> Self {
        Self { epoch, queue }
    }

    /// Epoch of the connection these events belong to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn opened(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed(reason.into()))
    }

    pub fn emit(&self, event: TransportEvent) -> bool {
        self.queue
            .send(Queued::Transport {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// A live connection.
pub trait TransportHandle: Send + Sync {
    /// Send one outbound audio frame. Not retried on failure.
    fn send(&self, frame: &OutboundFrame) -> Result<()>;

    /// Close the connection. Must be idempotent.
    fn close(&self);
}

/// Opens connections to the remote model.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting. `events.opened()` signals readiness; it may fire
    /// before or after this returns.
    ///
    /// # Errors
    /// A transport-class `ParleyError` if the connection cannot be attempted.
    fn connect(
        &self,
        config: &ConnectConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>>;
}
