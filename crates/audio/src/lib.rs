pub mod audiosample;
pub use audiosample::{AudioData, AudioSample, pcm_from_f32};

pub mod error;
pub use error::AudioError;

pub mod jitter;
pub use jitter::JitterBuffer;
