//! Session counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub blocks_captured: AtomicU64,
    pub frames_sent: AtomicU64,
    /// Blocks captured while no session was open.
    pub frames_dropped: AtomicU64,
    pub send_failures: AtomicU64,
    pub chunks_received: AtomicU64,
    /// Inbound chunks that failed to decode.
    pub chunks_dropped: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub interruptions: AtomicU64,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.blocks_captured.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.chunks_scheduled.store(0, Ordering::Relaxed);
        self.interruptions.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_captured: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub send_failures: u64,
    pub chunks_received: u64,
    pub chunks_dropped: u64,
    pub chunks_scheduled: u64,
    pub interruptions: u64,
}
