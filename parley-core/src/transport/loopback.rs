//! In-process echo transport.
//!
//! Reports `opened` immediately and answers every outbound frame with a model
//! audio chunk carrying the same speech, upsampled from the capture rate to
//! the playback rate. Lets the whole pipeline run end to end without a
//! remote service: speak and hear yourself back through the scheduler.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{ConnectConfig, ServerMessage, Transport, TransportEvents, TransportHandle};
use crate::{
    audio::resample::RateConverter,
    codec::{self, OutboundFrame},
    error::{ParleyError, Result},
};

pub struct LoopbackTransport {
    source_rate: u32,
    target_rate: u32,
    /// Events of the most recent connection, for `interrupt()`.
    current: Mutex<Option<TransportEvents>>,
    connections: AtomicU64,
}

impl LoopbackTransport {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
            current: Mutex::new(None),
            connections: AtomicU64::new(0),
        }
    }

    /// Connections opened so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Deliver a barge-in signal on the current connection.
    pub fn interrupt(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(events) => events.message(ServerMessage::interrupted()),
            None => false,
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(16_000, 24_000)
    }
}

impl Transport for LoopbackTransport {
    fn connect(
        &self,
        config: &ConnectConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>> {
        let converter = RateConverter::new(self.source_rate, self.target_rate, 256)?;
        info!(
            model = config.model.as_str(),
            epoch = events.epoch(),
            "loopback transport connected"
        );
        self.connections.fetch_add(1, Ordering::Relaxed);
        *self.current.lock() = Some(events.clone());
        events.opened();
        Ok(Arc::new(LoopbackHandle {
            events,
            source_rate: self.source_rate,
            converter: Mutex::new(converter),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackHandle {
    events: TransportEvents,
    source_rate: u32,
    converter: Mutex<RateConverter>,
    closed: AtomicBool,
}

impl TransportHandle for LoopbackHandle {
    fn send(&self, frame: &OutboundFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ParleyError::Transport("loopback connection closed".into()));
        }
        let samples = codec::decode_chunk(&frame.data, self.source_rate, 1)?;
        let Some(mono) = samples.channel(0) else {
            return Ok(());
        };
        let echoed = self.converter.lock().process(mono);
        if echoed.is_empty() {
            return Ok(());
        }
        debug!(samples = echoed.len(), "loopback echo");
        let reply = codec::encode_samples(&echoed);
        if !self.events.message(ServerMessage::audio(reply.data)) {
            return Err(ParleyError::Transport("session is gone".into()));
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.events.closed("loopback closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Queued, TransportEvent};
    use tokio::sync::mpsc;

    fn connect() -> (
        LoopbackTransport,
        Arc<dyn TransportHandle>,
        mpsc::UnboundedReceiver<Queued>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let t = LoopbackTransport::default();
        let config = ConnectConfig {
            model: "echo".into(),
            voice: "none".into(),
        };
        let h = t.connect(&config, TransportEvents::new(1, tx)).unwrap();
        (t, h, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Queued>) -> TransportEvent {
        match rx.try_recv().expect("event queued") {
            Queued::Transport { event, .. } => event,
            Queued::Shutdown => panic!("unexpected shutdown"),
        }
    }

    #[test]
    fn opens_immediately_and_echoes_at_playback_rate() {
        let (t, h, mut rx) = connect();
        assert_eq!(next_event(&mut rx), TransportEvent::Opened);
        assert_eq!(t.connections(), 1);

        h.send(&codec::encode_samples(&[0.25; 256])).unwrap();
        let TransportEvent::Message(msg) = next_event(&mut rx) else {
            panic!("expected echoed audio");
        };
        let payload = msg.audio_payloads().next().expect("audio part");
        let buf = codec::decode_chunk(payload, 24_000, 1).unwrap();
        assert!((buf.frames() as isize - 384).unsigned_abs() <= 10);
    }

    #[test]
    fn close_is_idempotent_and_blocks_sends() {
        let (_t, h, mut rx) = connect();
        let _ = next_event(&mut rx);
        h.close();
        h.close();
        assert_eq!(
            next_event(&mut rx),
            TransportEvent::Closed("loopback closed".into())
        );
        assert!(rx.try_recv().is_err(), "only one close event");
        assert!(h.send(&codec::encode_samples(&[0.0; 256])).is_err());
    }

    #[test]
    fn interrupt_reaches_the_current_connection() {
        let (t, _h, mut rx) = connect();
        let _ = next_event(&mut rx);
        assert!(t.interrupt());
        let TransportEvent::Message(msg) = next_event(&mut rx) else {
            panic!("expected interruption");
        };
        assert!(msg.is_interrupted());
    }
}
