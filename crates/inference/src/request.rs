use {
    crate::{
        config::LocalConfig,
        error::{InferError, Result},
        marker::{PreparedText, prepare_text},
        packet::{AudioCallback, PacketCallback},
    },
    uuid::Uuid,
};

/// One run of text with its own voice settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub text: String,
    pub language: Option<String>,
    pub emotion: Option<String>,
    pub speed: f32,
    pub loudness: f32,
}

impl Segment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            emotion: None,
            speed: 1.0,
            loudness: 1.0,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_loudness(mut self, loudness: f32) -> Self {
        self.loudness = loudness;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SynthInput {
    pub actor: String,
    pub segments: Vec<Segment>,
    pub local_config: Option<LocalConfig>,
}

impl SynthInput {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            segments: Vec::new(),
            local_config: None,
        }
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.segment(Segment::new(text))
    }

    pub fn with_config(mut self, local: LocalConfig) -> Self {
        self.local_config = Some(local);
        self
    }
}

/// A validated request waiting for or owned by the engine.
pub struct SynthRequest {
    pub id: Uuid,
    pub input: SynthInput,
    /// Marker-stripped text per segment.
    pub prepared: Vec<PreparedText>,
    pub warnings: Vec<String>,
    pub callback: PacketCallback,
    pub audio_callback: Option<AudioCallback>,
}

impl SynthRequest {
    /// Normalize `input`; fails when there is nothing to say.
    pub fn new(input: SynthInput, callback: PacketCallback) -> Result<Self> {
        if input.actor.is_empty() {
            return Err(InferError::Runtime("request names no actor".to_string()));
        }
        let prepared: Vec<PreparedText> = input
            .segments
            .iter()
            .map(|segment| prepare_text(&segment.text))
            .collect();
        if prepared.iter().all(|p| p.text.is_empty()) {
            return Err(InferError::Runtime("request has no text".to_string()));
        }
        let mut warnings = Vec::new();
        for (index, segment) in input.segments.iter().enumerate() {
            if !(segment.speed > 0.0) {
                warnings.push(format!("segment {}: speed {} replaced by 1.0", index, segment.speed));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            input,
            prepared,
            warnings,
            callback,
            audio_callback: None,
        })
    }

    pub fn with_audio_callback(mut self, callback: AudioCallback) -> Self {
        self.audio_callback = Some(callback);
        self
    }

    pub fn warn(&mut self, warning: String) {
        log::warn!("Request {}: {}", self.id, warning);
        self.warnings.push(warning);
    }
}
