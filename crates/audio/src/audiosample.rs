use base::Tensor;

#[derive(Clone, Debug, PartialEq)]
pub enum AudioData {
    Pcm(Tensor<i16>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioSample {
    pub data: AudioData,
    pub sample_rate: usize,
}

impl AudioSample {
    pub fn from_pcm(samples: Vec<i16>, sample_rate: usize) -> Self {
        Self {
            data: AudioData::Pcm(Tensor::from_vec(samples)),
            sample_rate,
        }
    }

    pub fn empty(sample_rate: usize) -> Self {
        Self::from_pcm(Vec::new(), sample_rate)
    }

    pub fn pcm(&self) -> &[i16] {
        match &self.data {
            AudioData::Pcm(tensor) => &tensor.data,
        }
    }

    pub fn len(&self) -> usize {
        self.pcm().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm().is_empty()
    }

    /// Duration of the sample in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }
}

/// Convert normalized float audio to 16-bit PCM, clamping out-of-range values.
pub fn pcm_from_f32(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}
