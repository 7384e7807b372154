use {
    crate::error::{InferError, Result},
    serde::{Deserialize, Serialize},
    std::{collections::HashMap, path::Path, time::Duration},
    uuid::Uuid,
};

/// Execution backend requested for tensor programs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Gpu,
}

/// Which slot a full heavy-layer set gives up for a newly recorded layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Replace the slot recorded longest ago.
    #[default]
    Oldest,
    /// Replace a uniformly chosen slot.
    Random,
}

/// Scheduling and synthesis options for one request.
///
/// Times are in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub target_budget_time: f64,
    pub target_frame_time: f64,
    pub use_adaptive_scheduling: bool,
    pub overshoot_margin: f64,
    pub max_skip_layers: usize,
    pub preferred_backend: Backend,
    pub fallback_language: String,
    pub fallback_emotion: String,
    pub eviction_policy: EvictionPolicy,
    pub phonemizer_iteration_cap: usize,
    pub jitter_buffer_samples: usize,
    pub marker_samples_per_symbol: Option<f32>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            target_budget_time: 0.008,
            target_frame_time: 1.0 / 60.0,
            use_adaptive_scheduling: true,
            overshoot_margin: 1.5,
            max_skip_layers: 8,
            preferred_backend: Backend::Cpu,
            fallback_language: "eng".to_string(),
            fallback_emotion: "neutral".to_string(),
            eviction_policy: EvictionPolicy::Oldest,
            phonemizer_iteration_cap: 200,
            jitter_buffer_samples: 4096,
            marker_samples_per_symbol: None,
        }
    }
}

impl InferenceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_budget_time > 0.0) {
            return Err(InferError::Runtime(format!(
                "target_budget_time must be positive, got {}",
                self.target_budget_time
            )));
        }
        if !(self.target_frame_time > 0.0) {
            return Err(InferError::Runtime(format!(
                "target_frame_time must be positive, got {}",
                self.target_frame_time
            )));
        }
        if !(self.overshoot_margin > 1.0) {
            return Err(InferError::Runtime(format!(
                "overshoot_margin must be greater than 1.0, got {}",
                self.overshoot_margin
            )));
        }
        if self.phonemizer_iteration_cap == 0 {
            return Err(InferError::Runtime(
                "phonemizer_iteration_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs_f64(self.target_budget_time)
    }

    pub fn frame_time(&self) -> Duration {
        Duration::from_secs_f64(self.target_frame_time)
    }

    /// Overlay every field set in `local` onto a copy of this config.
    pub fn merged(&self, local: &LocalConfig) -> InferenceConfig {
        let mut merged = self.clone();
        if let Some(value) = local.target_budget_time {
            merged.target_budget_time = value;
        }
        if let Some(value) = local.target_frame_time {
            merged.target_frame_time = value;
        }
        if let Some(value) = local.use_adaptive_scheduling {
            merged.use_adaptive_scheduling = value;
        }
        if let Some(value) = local.overshoot_margin {
            merged.overshoot_margin = value;
        }
        if let Some(value) = local.max_skip_layers {
            merged.max_skip_layers = value;
        }
        if let Some(value) = local.preferred_backend {
            merged.preferred_backend = value;
        }
        if let Some(value) = &local.fallback_language {
            merged.fallback_language = value.clone();
        }
        if let Some(value) = &local.fallback_emotion {
            merged.fallback_emotion = value.clone();
        }
        if let Some(value) = local.eviction_policy {
            merged.eviction_policy = value;
        }
        if let Some(value) = local.phonemizer_iteration_cap {
            merged.phonemizer_iteration_cap = value;
        }
        if let Some(value) = local.jitter_buffer_samples {
            merged.jitter_buffer_samples = value;
        }
        if local.marker_samples_per_symbol.is_some() {
            merged.marker_samples_per_symbol = local.marker_samples_per_symbol;
        }
        merged
    }
}

/// Per-request overrides; unset fields inherit from the global config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub target_budget_time: Option<f64>,
    pub target_frame_time: Option<f64>,
    pub use_adaptive_scheduling: Option<bool>,
    pub overshoot_margin: Option<f64>,
    pub max_skip_layers: Option<usize>,
    pub preferred_backend: Option<Backend>,
    pub fallback_language: Option<String>,
    pub fallback_emotion: Option<String>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub phonemizer_iteration_cap: Option<usize>,
    pub jitter_buffer_samples: Option<usize>,
    pub marker_samples_per_symbol: Option<f32>,
}

/// The global config plus the local overlays of requests still in flight.
#[derive(Debug, Default)]
pub struct ConfigStore {
    global: InferenceConfig,
    local: HashMap<Uuid, LocalConfig>,
}

impl ConfigStore {
    pub fn new(global: InferenceConfig) -> Self {
        Self {
            global,
            local: HashMap::new(),
        }
    }

    pub fn global(&self) -> &InferenceConfig {
        &self.global
    }

    pub fn set_global(&mut self, global: InferenceConfig) {
        self.global = global;
    }

    pub fn set_local(&mut self, id: Uuid, local: LocalConfig) {
        self.local.insert(id, local);
    }

    pub fn has_local(&self, id: &Uuid) -> bool {
        self.local.contains_key(id)
    }

    /// Effective config for a request.
    pub fn resolve(&self, id: &Uuid) -> InferenceConfig {
        match self.local.get(id) {
            Some(local) => self.global.merged(local),
            None => self.global.clone(),
        }
    }

    /// Forget the overlay of a finished request.
    pub fn discard(&mut self, id: &Uuid) {
        self.local.remove(id);
    }
}
