//! Session status events for external display.
//!
//! Broadcast by `SessionController` on every state change. A host renders
//! `detail` as its status line.

use serde::{Deserialize, Serialize};

/// Emitted when the session state changes or new status text is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Human-readable status or error text.
    pub detail: Option<String>,
}

/// Lifecycle of the transport connection owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No connection. Initial and terminal state.
    #[default]
    Disconnected,
    /// `connect` issued, waiting for the transport to report open.
    Connecting,
    /// Connection live; outbound frames are sent.
    Open,
    /// The remote side closed the connection. Nothing reconnects until
    /// `open()` or `reset()` is called.
    Closed,
}

impl SessionState {
    /// Outbound audio is only sent in this state.
    pub fn accepts_audio(self) -> bool {
        self == SessionState::Open
    }
}
