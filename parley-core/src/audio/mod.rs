//! Platform audio: graph contexts, taps, device backends, resampling.

pub mod context;
pub mod device;
pub mod input;
pub mod output;
pub mod resample;
pub mod tap;

pub use context::{AudioContext, FrameClock};
pub use input::{CaptureRequest, CpalInput, InputBackend, InputStream};
pub use output::{CpalOutput, OutputBackend, OutputStream, PlaybackRequest};
pub use tap::AudioTap;
