use {
    crate::{
        catalog::ModuleCatalog,
        error::{InferError, Result},
        lock,
        phoneme::PhonemeTable,
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::{HashMap, HashSet},
        fmt,
        sync::{Arc, Mutex},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Actor,
    Language,
}

impl ModuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Actor => "actor",
            ModuleKind::Language => "language",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content hashes of the programs making up one voice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorWorkloads {
    pub encoder: String,
    pub decoder_preprocess: String,
    pub decoder_first: String,
    pub decoder_middle: String,
    pub decoder_last: String,
    pub vocoder_first: String,
    pub vocoder_middle: String,
    pub vocoder_last: String,
}

impl ActorWorkloads {
    /// Every hash once, in pipeline order.
    pub fn hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = Vec::new();
        for hash in [
            &self.encoder,
            &self.decoder_preprocess,
            &self.decoder_first,
            &self.decoder_middle,
            &self.decoder_last,
            &self.vocoder_first,
            &self.vocoder_middle,
            &self.vocoder_last,
        ] {
            if !hashes.contains(hash) {
                hashes.push(hash.clone());
            }
        }
        hashes
    }
}

fn default_start_symbol() -> i64 {
    1
}

fn default_end_symbol() -> i64 {
    2
}

fn default_marker_samples_per_symbol() -> f32 {
    256.0
}

/// Catalog metadata of a voice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorDescriptor {
    pub id: String,
    pub workloads: ActorWorkloads,
    /// Languages this voice can speak, the first one is the default.
    pub languages: Vec<String>,
    #[serde(default)]
    pub default_emotion: Option<String>,
    /// Phoneme symbol → encoder input id.
    pub symbols: HashMap<String, i64>,
    /// Emotion name → encoder input id.
    pub emotions: HashMap<String, i64>,
    #[serde(default = "default_start_symbol")]
    pub start_symbol: i64,
    #[serde(default = "default_end_symbol")]
    pub end_symbol: i64,
    pub sample_rate: usize,
    /// Hop between consecutive middle chunks, in decoder frames.
    pub chunk_hop: i64,
    /// Output samples per encoder symbol, tied to the model's downsampling ratio.
    #[serde(default = "default_marker_samples_per_symbol")]
    pub marker_samples_per_symbol: f32,
}

fn default_pad_id() -> i64 {
    0
}

fn default_eos_id() -> i64 {
    1
}

/// Catalog metadata of a language pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LanguageDescriptor {
    pub id: String,
    /// Index fed to the encoder's language input.
    pub language_index: i64,
    /// Hash of the grapheme → phoneme program.
    pub phonemizer: String,
    /// Grapheme → phonemizer input id.
    pub graphemes: HashMap<String, i64>,
    /// Phonemizer output id → phoneme symbol(s).
    pub phonemes: Vec<String>,
    #[serde(default)]
    pub lexicon: HashMap<String, String>,
    #[serde(default = "default_pad_id")]
    pub pad_id: i64,
    #[serde(default = "default_eos_id")]
    pub eos_id: i64,
}

pub struct ActorModule {
    descriptor: ActorDescriptor,
    symbols: HashMap<char, i64>,
}

impl ActorModule {
    pub fn new(descriptor: ActorDescriptor) -> Result<Self> {
        if descriptor.languages.is_empty() {
            return Err(InferError::Runtime(format!(
                "actor {} declares no languages",
                descriptor.id
            )));
        }
        let mut symbols = HashMap::new();
        for (symbol, &id) in &descriptor.symbols {
            let mut chars = symbol.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => {
                    symbols.insert(ch, id);
                }
                _ => log::warn!(
                    "Actor {}: ignoring multi-char symbol '{}'",
                    descriptor.id,
                    symbol
                ),
            }
        }
        Ok(Self {
            descriptor,
            symbols,
        })
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ActorDescriptor {
        &self.descriptor
    }

    pub fn workloads(&self) -> &ActorWorkloads {
        &self.descriptor.workloads
    }

    pub fn languages(&self) -> &[String] {
        &self.descriptor.languages
    }

    pub fn speaks(&self, language: &str) -> bool {
        self.descriptor.languages.iter().any(|l| l == language)
    }

    pub fn symbol_id(&self, symbol: char) -> Option<i64> {
        self.symbols.get(&symbol).copied()
    }

    pub fn emotion_id(&self, emotion: &str) -> Option<i64> {
        self.descriptor.emotions.get(emotion).copied()
    }

    pub fn sample_rate(&self) -> usize {
        self.descriptor.sample_rate
    }
}

pub struct LanguageModule {
    descriptor: LanguageDescriptor,
    graphemes: HashMap<char, i64>,
    table: Mutex<PhonemeTable>,
}

impl LanguageModule {
    pub fn new(descriptor: LanguageDescriptor) -> Self {
        let graphemes = descriptor
            .graphemes
            .iter()
            .filter_map(|(grapheme, &id)| {
                let mut chars = grapheme.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some((ch, id)),
                    _ => None,
                }
            })
            .collect();
        let table = Mutex::new(PhonemeTable::new(descriptor.lexicon.clone()));
        Self {
            descriptor,
            graphemes,
            table,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &LanguageDescriptor {
        &self.descriptor
    }

    pub fn phonemizer(&self) -> &str {
        &self.descriptor.phonemizer
    }

    pub fn language_index(&self) -> i64 {
        self.descriptor.language_index
    }

    pub fn lookup(&self, word: &str) -> Option<String> {
        lock(&self.table).get(word).map(|p| p.to_string())
    }

    pub fn is_known(&self, word: &str) -> bool {
        lock(&self.table).contains(word)
    }

    pub fn memoize(&self, word: &str, phonemes: String) -> bool {
        lock(&self.table).memoize(word, phonemes)
    }

    pub fn learned_words(&self) -> usize {
        lock(&self.table).learned()
    }

    pub fn clear_table(&self) {
        lock(&self.table).clear();
    }

    /// Phonemizer input ids for `word`; unknown graphemes map to the pad id.
    pub fn grapheme_ids(&self, word: &str) -> Vec<i64> {
        word.to_lowercase()
            .chars()
            .map(|ch| {
                self.graphemes
                    .get(&ch)
                    .copied()
                    .unwrap_or(self.descriptor.pad_id)
            })
            .collect()
    }

    /// Turn phonemizer output ids into a phoneme string, stopping at end-of-sequence.
    pub fn decode(&self, tokens: &[i64]) -> String {
        let mut phonemes = String::new();
        for &token in tokens {
            if token == self.descriptor.eos_id {
                break;
            }
            if token == self.descriptor.pad_id {
                continue;
            }
            match usize::try_from(token)
                .ok()
                .and_then(|index| self.descriptor.phonemes.get(index))
            {
                Some(symbol) => phonemes.push_str(symbol),
                None => log::warn!("Language {}: phoneme id {} out of range", self.id(), token),
            }
        }
        phonemes
    }
}

/// A loaded module of any kind.
#[derive(Clone)]
pub enum Module {
    Actor(Arc<ActorModule>),
    Language(Arc<LanguageModule>),
}

impl Module {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::Actor(_) => ModuleKind::Actor,
            Module::Language(_) => ModuleKind::Language,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Module::Actor(actor) => actor.id(),
            Module::Language(language) => language.id(),
        }
    }

    /// Workload hashes the module needs registered.
    pub fn workload_hashes(&self) -> Vec<String> {
        match self {
            Module::Actor(actor) => actor.workloads().hashes(),
            Module::Language(language) => vec![language.phonemizer().to_string()],
        }
    }

    /// Everything the module owns or shares: workload hashes plus its lookup table.
    pub fn resource_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self.workload_hashes().into_iter().collect();
        if let Module::Language(language) = self {
            ids.insert(format!("phonemes:{}", language.id()));
        }
        ids
    }

    /// Drop cached runtime tables.
    pub fn clear_tables(&self) {
        if let Module::Language(language) = self {
            language.clear_table();
        }
    }
}

/// The closed set of module types the handler can load.
pub trait ModuleType: Sized + Send + Sync + 'static {
    const KIND: ModuleKind;

    fn load(id: &str, catalog: &dyn ModuleCatalog) -> Result<Self>;

    fn wrap(module: Arc<Self>) -> Module;

    fn unwrap(module: &Module) -> Option<Arc<Self>>;
}

impl ModuleType for ActorModule {
    const KIND: ModuleKind = ModuleKind::Actor;

    fn load(id: &str, catalog: &dyn ModuleCatalog) -> Result<Self> {
        ActorModule::new(catalog.actor(id)?)
    }

    fn wrap(module: Arc<Self>) -> Module {
        Module::Actor(module)
    }

    fn unwrap(module: &Module) -> Option<Arc<Self>> {
        match module {
            Module::Actor(actor) => Some(Arc::clone(actor)),
            _ => None,
        }
    }
}

impl ModuleType for LanguageModule {
    const KIND: ModuleKind = ModuleKind::Language;

    fn load(id: &str, catalog: &dyn ModuleCatalog) -> Result<Self> {
        Ok(LanguageModule::new(catalog.language(id)?))
    }

    fn wrap(module: Arc<Self>) -> Module {
        Module::Language(module)
    }

    fn unwrap(module: &Module) -> Option<Arc<Self>> {
        match module {
            Module::Language(language) => Some(Arc::clone(language)),
            _ => None,
        }
    }
}
