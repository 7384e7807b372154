//! Scripted tensor programs with simulated per-layer cost.
//!
//! They follow the stage tensor contract of `session`, so a complete voice
//! can run end to end without model files. Used by the tests and the
//! `synth-loop` experiment.

use {
    crate::{
        catalog::{MemoryCatalog, content_hash},
        error::{InferError, Result},
        frame::ManualTime,
        lock,
        module::{ActorDescriptor, ActorWorkloads, LanguageDescriptor},
        program::TensorProgram,
        session::{
            AUDIO, BOUNDARY_CLONE_ALPHA, CHUNK_HOP, DEC_CHUNK_INDEX, DEC_NBR_CHUNKS, ENC_EMOTIONS,
            ENC_LANGUAGES, ENC_LOUDNESS, ENC_PHONEMES, ENC_SPEED, PHON_FINISHED, PHON_GRAPHEMES,
            PHON_TOKENS,
        },
        tensor_pool::TensorValue,
    },
    base::Tensor,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    },
};

pub const ENC_HIDDEN: &str = "enc_hidden";
pub const DEC_STATE: &str = "dec_state";
pub const DEC_FRAMES: &str = "dec_frames";

/// How simulated layer time is spent.
#[derive(Clone, Default)]
pub enum CostClock {
    #[default]
    Free,
    /// Advance a manual clock, for deterministic tests.
    Manual(ManualTime),
    /// Really sleep.
    Sleep,
}

#[derive(Clone, Default)]
pub struct LayerCosts {
    pub base: Duration,
    pub slow: HashMap<usize, Duration>,
    pub clock: CostClock,
}

impl LayerCosts {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn manual(time: &ManualTime, base: Duration) -> Self {
        Self {
            base,
            slow: HashMap::new(),
            clock: CostClock::Manual(time.clone()),
        }
    }

    pub fn sleep(base: Duration) -> Self {
        Self {
            base,
            slow: HashMap::new(),
            clock: CostClock::Sleep,
        }
    }

    pub fn with_slow_layer(mut self, layer: usize, cost: Duration) -> Self {
        self.slow.insert(layer, cost);
        self
    }

    pub fn cost(&self, layer: usize) -> Duration {
        self.slow.get(&layer).copied().unwrap_or(self.base)
    }

    fn spend(&self, layer: usize) {
        let cost = self.cost(layer);
        match &self.clock {
            CostClock::Free => {}
            CostClock::Manual(time) => time.advance(cost),
            CostClock::Sleep => std::thread::sleep(cost),
        }
    }
}

/// Pass and layer counters per program name, shared with every program built from one voice.
#[derive(Clone, Default)]
pub struct SyntheticStats {
    passes: Arc<Mutex<HashMap<String, usize>>>,
    layers: Arc<Mutex<HashMap<String, usize>>>,
}

impl SyntheticStats {
    pub fn passes(&self, name: &str) -> usize {
        lock(&self.passes).get(name).copied().unwrap_or(0)
    }

    pub fn layers(&self, name: &str) -> usize {
        lock(&self.layers).get(name).copied().unwrap_or(0)
    }

    fn count_pass(&self, name: &str) {
        *lock(&self.passes).entry(name.to_string()).or_insert(0) += 1;
    }

    fn count_layer(&self, name: &str) {
        *lock(&self.layers).entry(name.to_string()).or_insert(0) += 1;
    }
}

pub type ComputeFn =
    Arc<dyn Fn(&HashMap<String, TensorValue>) -> Result<Vec<(String, TensorValue)>> + Send + Sync>;

/// A program whose layers only cost time and whose outputs come from a closure.
pub struct ScriptedProgram {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    layers: usize,
    costs: LayerCosts,
    compute: ComputeFn,
    stats: SyntheticStats,
    fail_on_step: Option<usize>,
    bound: HashMap<String, TensorValue>,
    results: HashMap<String, TensorValue>,
    cursor: usize,
}

impl ScriptedProgram {
    pub fn new<F>(name: impl Into<String>, inputs: &[&str], outputs: &[&str], layers: usize, compute: F) -> Self
    where
        F: Fn(&HashMap<String, TensorValue>) -> Result<Vec<(String, TensorValue)>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            layers,
            costs: LayerCosts::free(),
            compute: Arc::new(compute),
            stats: SyntheticStats::default(),
            fail_on_step: None,
            bound: HashMap::new(),
            results: HashMap::new(),
            cursor: 0,
        }
    }

    /// Program with no inputs or outputs, only layer cost.
    pub fn timed(name: impl Into<String>, layers: usize, costs: LayerCosts) -> Self {
        Self::new(name, &[], &[], layers, |_| Ok(Vec::new())).with_costs(costs)
    }

    pub fn with_costs(mut self, costs: LayerCosts) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_stats(mut self, stats: SyntheticStats) -> Self {
        self.stats = stats;
        self
    }

    /// Make layer `layer` fail.
    pub fn failing_at(mut self, layer: usize) -> Self {
        self.fail_on_step = Some(layer);
        self
    }

    fn compute(&mut self) -> Result<()> {
        if self.results.is_empty() && !self.outputs.is_empty() {
            for (name, value) in (self.compute)(&self.bound)? {
                self.results.insert(name, value);
            }
        }
        Ok(())
    }
}

impl TensorProgram for ScriptedProgram {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn layer_count(&self) -> usize {
        self.layers
    }

    fn bind(&mut self, name: &str, value: &TensorValue) -> Result<()> {
        self.bound.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.cursor = 0;
        self.results.clear();
        self.stats.count_pass(&self.name);
        Ok(())
    }

    fn step(&mut self) -> Result<bool> {
        if self.cursor >= self.layers {
            return Ok(false);
        }
        if self.fail_on_step == Some(self.cursor) {
            return Err(InferError::Runtime(format!(
                "{}: layer {} failed",
                self.name, self.cursor
            )));
        }
        self.costs.spend(self.cursor);
        self.stats.count_layer(&self.name);
        self.cursor += 1;
        Ok(self.cursor < self.layers)
    }

    fn current_layer(&self) -> usize {
        self.cursor
    }

    fn output(&mut self, name: &str) -> Result<TensorValue> {
        self.compute()?;
        self.results
            .remove(name)
            .ok_or_else(|| InferError::NotFound(format!("{} output '{}'", self.name, name)))
    }

    fn dispose(&mut self) {
        self.bound.clear();
        self.results.clear();
    }
}

fn stage_fn<F>(f: F) -> ComputeFn
where
    F: Fn(&HashMap<String, TensorValue>) -> Result<Vec<(String, TensorValue)>> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn input<'a>(inputs: &'a HashMap<String, TensorValue>, name: &str) -> Result<&'a TensorValue> {
    inputs
        .get(name)
        .ok_or_else(|| InferError::NotFound(format!("input '{}'", name)))
}

const EOS: i64 = 1;
const PAD: i64 = 0;
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyz'";
const EXTRA_SYMBOLS: &str = " ,.!?-ðəʊɜæʃθŋɪɛɔ";

/// A complete scripted voice: one actor, one language, all stage programs.
#[derive(Clone)]
pub struct SyntheticVoice {
    pub actor: String,
    pub language: String,
    /// Chunk count reported by decoder preprocessing.
    pub chunks: i64,
    pub layers: usize,
    pub samples_per_chunk: usize,
    pub sample_rate: usize,
    pub costs: LayerCosts,
    pub lexicon: HashMap<String, String>,
    /// When false the phonemizer never emits end-of-sequence.
    pub phonemizer_finishes: bool,
    /// Stage whose first layer fails, e.g. `"decoder_middle"`.
    pub failing_stage: Option<String>,
    /// Share the vocoder with other voices using the same family name.
    pub vocoder_family: Option<String>,
    pub stats: SyntheticStats,
}

impl SyntheticVoice {
    pub fn new(actor: impl Into<String>) -> Self {
        let lexicon = [("hello", "həloʊ"), ("world", "wɜld"), ("the", "ðə"), ("cat", "kæt")]
            .iter()
            .map(|(word, phonemes)| (word.to_string(), phonemes.to_string()))
            .collect();
        Self {
            actor: actor.into(),
            language: "eng".to_string(),
            chunks: 3,
            layers: 4,
            samples_per_chunk: 480,
            sample_rate: 24000,
            costs: LayerCosts::free(),
            lexicon,
            phonemizer_finishes: true,
            failing_stage: None,
            vocoder_family: None,
            stats: SyntheticStats::default(),
        }
    }

    fn family(&self, stage: &str) -> String {
        match (&self.vocoder_family, stage.starts_with("vocoder")) {
            (Some(family), true) => family.clone(),
            _ => self.actor.clone(),
        }
    }

    pub fn hash(&self, stage: &str) -> String {
        content_hash(format!("synthetic:{}:{}", self.family(stage), stage).as_bytes())
    }

    pub fn phonemizer_hash(&self) -> String {
        content_hash(format!("synthetic:{}:phonemizer", self.language).as_bytes())
    }

    pub fn actor_descriptor(&self) -> ActorDescriptor {
        let symbols = LETTERS
            .chars()
            .chain(EXTRA_SYMBOLS.chars())
            .chain(self.lexicon.values().flat_map(|p| p.chars()))
            .fold(HashMap::new(), |mut symbols, ch| {
                let next = symbols.len() as i64 + 3;
                symbols.entry(ch.to_string()).or_insert(next);
                symbols
            });
        ActorDescriptor {
            id: self.actor.clone(),
            workloads: ActorWorkloads {
                encoder: self.hash("encoder"),
                decoder_preprocess: self.hash("decoder_preprocess"),
                decoder_first: self.hash("decoder_first"),
                decoder_middle: self.hash("decoder_middle"),
                decoder_last: self.hash("decoder_last"),
                vocoder_first: self.hash("vocoder_first"),
                vocoder_middle: self.hash("vocoder_middle"),
                vocoder_last: self.hash("vocoder_last"),
            },
            languages: vec![self.language.clone()],
            default_emotion: Some("neutral".to_string()),
            symbols,
            emotions: [("neutral", 0), ("happy", 1), ("sad", 2)]
                .iter()
                .map(|(name, id)| (name.to_string(), *id))
                .collect(),
            start_symbol: 1,
            end_symbol: 2,
            sample_rate: self.sample_rate,
            chunk_hop: 4,
            marker_samples_per_symbol: 100.0,
        }
    }

    /// Graphemes are the letters; phoneme id n spells the grapheme with id n.
    pub fn language_descriptor(&self) -> LanguageDescriptor {
        let mut phonemes = vec![String::new(), String::new()];
        let mut graphemes = HashMap::new();
        for (index, ch) in LETTERS.chars().enumerate() {
            graphemes.insert(ch.to_string(), index as i64 + 2);
            phonemes.push(ch.to_string());
        }
        LanguageDescriptor {
            id: self.language.clone(),
            language_index: 0,
            phonemizer: self.phonemizer_hash(),
            graphemes,
            phonemes,
            lexicon: self.lexicon.clone(),
            pad_id: PAD,
            eos_id: EOS,
        }
    }

    fn program(&self, stage: &str, inputs: &[&str], outputs: &[&str], compute: ComputeFn) -> ScriptedProgram {
        let mut program = ScriptedProgram::new(stage, inputs, outputs, self.layers, move |bound| compute(bound))
            .with_costs(self.costs.clone())
            .with_stats(self.stats.clone());
        if self.failing_stage.as_deref() == Some(stage) {
            program = program.failing_at(0);
        }
        program
    }

    /// Build the program of `stage`.
    pub fn build(&self, stage: &str) -> Result<ScriptedProgram> {
        let chunks = self.chunks;
        let samples = self.samples_per_chunk;
        let finishes = self.phonemizer_finishes;
        let program = match stage {
            "phonemizer" => self.program(
                stage,
                &[PHON_GRAPHEMES, PHON_TOKENS],
                &[PHON_TOKENS, PHON_FINISHED],
                stage_fn(move |bound| phonemizer_step(bound, finishes)),
            ),
            "encoder" => self.program(
                stage,
                &[ENC_PHONEMES, ENC_EMOTIONS, ENC_LANGUAGES, ENC_SPEED, ENC_LOUDNESS],
                &[ENC_HIDDEN],
                stage_fn(|bound| {
                    let phonemes = input(bound, ENC_PHONEMES)?.to_f32();
                    let speed = input(bound, ENC_SPEED)?.as_f32()?;
                    let data = phonemes
                        .data
                        .iter()
                        .zip(speed.data.iter())
                        .map(|(p, s)| p * s)
                        .collect();
                    Ok(vec![(
                        ENC_HIDDEN.to_string(),
                        Tensor::new(phonemes.shape.clone(), data)?.into(),
                    )])
                }),
            ),
            "decoder_preprocess" => self.program(
                stage,
                &[ENC_HIDDEN],
                &[DEC_NBR_CHUNKS, DEC_STATE],
                stage_fn(move |bound| {
                    let hidden = input(bound, ENC_HIDDEN)?.as_f32()?;
                    let state: f32 = hidden.data.iter().sum();
                    Ok(vec![
                        (DEC_NBR_CHUNKS.to_string(), Tensor::from_scalar(chunks).into()),
                        (DEC_STATE.to_string(), Tensor::from_vec(vec![state]).into()),
                    ])
                }),
            ),
            "decoder_first" | "decoder_middle" | "decoder_last" => {
                let mut inputs = vec![DEC_STATE, DEC_CHUNK_INDEX, BOUNDARY_CLONE_ALPHA];
                let middle = stage == "decoder_middle";
                if middle {
                    inputs.push(CHUNK_HOP);
                }
                self.program(
                    stage,
                    &inputs,
                    &[DEC_FRAMES, DEC_STATE],
                    stage_fn(move |bound| {
                        let index = input(bound, DEC_CHUNK_INDEX)?.as_i64()?.data.first().copied().unwrap_or(0);
                        let alpha = input(bound, BOUNDARY_CLONE_ALPHA)?.as_f32()?.data.first().copied().unwrap_or(0.0);
                        let hop = if middle {
                            input(bound, CHUNK_HOP)?.as_i64()?.data.first().copied().unwrap_or(0)
                        } else {
                            0
                        };
                        let state = input(bound, DEC_STATE)?.as_f32()?.clone();
                        let frame = index as f32 + alpha + hop as f32;
                        Ok(vec![
                            (DEC_FRAMES.to_string(), Tensor::from_vec(vec![frame; 8]).into()),
                            (DEC_STATE.to_string(), state.into()),
                        ])
                    }),
                )
            }
            "vocoder_first" | "vocoder_middle" | "vocoder_last" => self.program(
                stage,
                &[DEC_FRAMES],
                &[AUDIO],
                stage_fn(move |bound| {
                    let frames = input(bound, DEC_FRAMES)?.as_f32()?;
                    let base = frames.data.first().copied().unwrap_or(0.0);
                    let audio = (0..samples)
                        .map(|i| ((i as f32 * 0.05 + base).sin() * 0.25))
                        .collect();
                    Ok(vec![(AUDIO.to_string(), Tensor::from_vec(audio).into())])
                }),
            ),
            other => {
                return Err(InferError::NotFound(format!("synthetic stage {}", other)));
            }
        };
        Ok(program)
    }

    pub const STAGES: [&'static str; 8] = [
        "encoder",
        "decoder_preprocess",
        "decoder_first",
        "decoder_middle",
        "decoder_last",
        "vocoder_first",
        "vocoder_middle",
        "vocoder_last",
    ];

    /// Register the actor, its language and every stage program.
    pub fn install(&self, catalog: &mut MemoryCatalog) {
        catalog.add_actor(self.actor_descriptor());
        catalog.add_language(self.language_descriptor());
        for stage in Self::STAGES.iter().chain(["phonemizer"].iter()) {
            let hash = if *stage == "phonemizer" {
                self.phonemizer_hash()
            } else {
                self.hash(stage)
            };
            let voice = self.clone();
            let stage = stage.to_string();
            catalog.add_program(hash, move |_| {
                let program: Box<dyn TensorProgram> = Box::new(voice.build(&stage)?);
                Ok(program)
            });
        }
    }

    /// A catalog holding just this voice.
    pub fn catalog(&self) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        self.install(&mut catalog);
        catalog
    }
}

// one autoregressive step: every row emits its next grapheme, then end-of-sequence
fn phonemizer_step(bound: &HashMap<String, TensorValue>, finishes: bool) -> Result<Vec<(String, TensorValue)>> {
    let graphemes = input(bound, PHON_GRAPHEMES)?.as_i64()?;
    let tokens = input(bound, PHON_TOKENS)?.as_i64()?;
    let rows = graphemes.shape.first().copied().unwrap_or(0);
    let steps = tokens.shape.get(1).copied().unwrap_or(0);

    let mut next_tokens = Vec::with_capacity(rows * (steps + 1));
    let mut finished = Vec::with_capacity(rows);
    for row in 0..rows {
        let word: Vec<i64> = graphemes
            .row(row)
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(|&g| g != PAD)
            .collect();
        let previous = tokens.row(row).unwrap_or(&[]);
        let next = match (finishes, word.get(steps)) {
            (_, Some(&grapheme)) => grapheme,
            (true, None) => EOS,
            (false, None) => word.first().copied().unwrap_or(2),
        };
        next_tokens.extend_from_slice(previous);
        next_tokens.push(next);
        finished.push(i64::from(next == EOS));
    }
    Ok(vec![
        (
            PHON_TOKENS.to_string(),
            Tensor::new(vec![rows, steps + 1], next_tokens)?.into(),
        ),
        (
            PHON_FINISHED.to_string(),
            Tensor::new(vec![rows], finished)?.into(),
        ),
    ])
}
