//! JSON message shapes exchanged with the remote model.
//!
//! Inbound:
//! ```json
//! { "serverContent": { "modelTurn": { "parts": [ { "inlineData": { "data": "<b64>" } } ] },
//!                      "interrupted": true } }
//! ```
//! Outbound:
//! ```json
//! { "media": { "data": "<b64>", "mimeType": "audio/pcm;rate=16000" } }
//! ```
//! Unknown fields are ignored so newer servers do not break older clients.

use serde::{Deserialize, Serialize};

use crate::{codec::OutboundFrame, error::Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// Base64 of little-endian i16 PCM at the playback rate.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ServerMessage {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// A model turn carrying one audio payload.
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        inline_data: Some(InlineData {
                            data: data.into(),
                            mime_type: Some("audio/pcm;rate=24000".into()),
                        }),
                        text: None,
                    }],
                }),
                interrupted: None,
            }),
        }
    }

    /// The remote speaker was cut off.
    pub fn interrupted() -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: None,
                interrupted: Some(true),
            }),
        }
    }

    /// Inline audio payloads of the model turn, in order.
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|t| t.parts.iter())
            .filter_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }
}

/// Outbound realtime input envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: OutboundFrame,
}

impl RealtimeInput {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<OutboundFrame> for RealtimeInput {
    fn from(media: OutboundFrame) -> Self {
        Self { media }
    }
}
