use crate::{AudioError, AudioSample};

/// Accumulates streamed PCM chunks and releases them in larger blocks.
///
/// Data is held back until at least `threshold` samples are pending, or until
/// the final chunk of a stream arrives, which flushes everything.
#[derive(Debug)]
pub struct JitterBuffer {
    threshold: usize,
    sample_rate: Option<usize>,
    pending: Vec<i16>,
}

impl JitterBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            sample_rate: None,
            pending: Vec::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of samples currently held back.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Add a chunk. Returns the accumulated audio when it is ready to be forwarded.
    pub fn push(
        &mut self,
        sample: &AudioSample,
        is_final: bool,
    ) -> Result<Option<AudioSample>, AudioError> {
        match self.sample_rate {
            Some(rate) if rate != sample.sample_rate => {
                return Err(AudioError::Buffer(format!(
                    "sample rate changed mid-stream: {} -> {}",
                    rate, sample.sample_rate
                )));
            }
            _ => self.sample_rate = Some(sample.sample_rate),
        }

        self.pending.extend_from_slice(sample.pcm());
        if is_final || self.pending.len() >= self.threshold {
            let released = self.take();
            if is_final {
                self.sample_rate = None;
            }
            return Ok(released);
        }
        Ok(None)
    }

    /// Drop anything held back, e.g. when the stream failed.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Jitter buffer dropped {} pending samples", self.pending.len());
        }
        self.pending.clear();
        self.sample_rate = None;
    }

    fn take(&mut self) -> Option<AudioSample> {
        let sample_rate = self.sample_rate?;
        Some(AudioSample::from_pcm(
            std::mem::take(&mut self.pending),
            sample_rate,
        ))
    }
}
