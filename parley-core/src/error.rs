use thiserror::Error;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no session is open")]
    NotConnected,

    #[error("malformed audio payload: {0}")]
    Decode(String),

    #[error("malformed base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed server message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error category, used to render status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Microphone / speaker permission or availability.
    Device,
    /// Connection-level failure.
    Transport,
    /// Malformed inbound payload.
    Decode,
    Internal,
}

impl ParleyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(_)
            | Self::AudioStream(_)
            | Self::NoDefaultInputDevice
            | Self::NoDefaultOutputDevice => ErrorKind::Device,
            Self::Transport(_) | Self::NotConnected => ErrorKind::Transport,
            Self::Decode(_) | Self::Base64(_) | Self::Json(_) => ErrorKind::Decode,
            Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_variants_classify_as_device() {
        assert_eq!(ParleyError::NoDefaultInputDevice.kind(), ErrorKind::Device);
        assert_eq!(
            ParleyError::AudioStream("denied".into()).kind(),
            ErrorKind::Device
        );
    }

    #[test]
    fn base64_failure_is_a_decode_error() {
        use base64::Engine as _;
        let err: ParleyError = base64::engine::general_purpose::STANDARD
            .decode("***")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
