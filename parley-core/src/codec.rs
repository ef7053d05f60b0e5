//! PCM ↔ wire conversion.
//!
//! ## Outbound
//!
//! ```text
//! f32 block → clamp [-1, 1] → ×32768, round, saturate → i16 LE bytes → base64
//! ```
//!
//! +1.0 saturates to 32 767 so the full input range fits in i16. Decoding
//! divides by 32 768, which keeps the encode→decode error within one
//! quantization step (1/32 768) for every input in [-1, 1].
//!
//! ## Inbound
//!
//! `decode` only undoes base64; `decode_audio_data` interprets the bytes as
//! interleaved i16 LE PCM at a caller-supplied rate. No sample-rate conversion
//! happens here: the remote side authors audio at the playback rate.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{
    buffering::block::{AudioBuffer, PcmBlock},
    error::{ParleyError, Result},
};

/// MIME-style tag attached to every outbound frame.
pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// One encoded capture block, ready for `Transport::send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    /// Base64 of little-endian i16 PCM.
    pub data: String,
    pub mime_type: String,
}

impl OutboundFrame {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Convert one float sample to i16.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * 32_768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one i16 sample back to float in [-1, 1).
#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / 32_768.0
}

/// Encode a capture block into an outbound frame tagged `audio/pcm;rate=16000`.
pub fn encode(block: &PcmBlock) -> OutboundFrame {
    encode_samples(block.samples())
}

/// Encode raw samples. An empty slice yields an empty payload.
pub fn encode_samples(samples: &[f32]) -> OutboundFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    OutboundFrame {
        data: STANDARD.encode(&bytes),
        mime_type: PCM_MIME_TYPE.to_string(),
    }
}

/// Undo base64 only.
///
/// # Errors
/// `ParleyError::Base64` on malformed input.
pub fn decode(payload: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(payload.trim())?)
}

/// Interpret `bytes` as interleaved little-endian i16 PCM.
///
/// The numeric samples are used as-is; `sample_rate` and `channel_count` are
/// only declared on the resulting buffer.
///
/// # Errors
/// `ParleyError::Decode` when the byte count is not a whole number of
/// frames, or `channel_count` is zero.
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channel_count: u16) -> Result<AudioBuffer> {
    if channel_count == 0 {
        return Err(ParleyError::Decode("channel count must be at least 1".into()));
    }
    if sample_rate == 0 {
        return Err(ParleyError::Decode("sample rate must be non-zero".into()));
    }
    let channels = channel_count as usize;
    let frame_bytes = channels * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(ParleyError::Decode(format!(
            "{} bytes is not a whole number of {}-channel i16 frames",
            bytes.len(),
            channels
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        planar[i % channels].push(i16_to_sample(value));
    }

    Ok(AudioBuffer::from_planar(planar, sample_rate))
}

/// `decode` followed by `decode_audio_data`.
pub fn decode_chunk(payload: &str, sample_rate: u32, channel_count: u16) -> Result<AudioBuffer> {
    let bytes = decode(payload)?;
    decode_audio_data(&bytes, sample_rate, channel_count)
}
