use {
    crate::{
        config::InferenceConfig,
        context::SynthContext,
        error::{InferError, Result},
        frame::FrameBudget,
        lock,
        marker::{MarkerAligner, transcribe},
        module::{ActorModule, LanguageModule},
        packet::{DataPacket, PacketStatus},
        phoneme::{TextPiece, normalize_word, split_words},
        request::SynthRequest,
        tensor_pool::TensorPool,
        workload::{SliceParams, run_autoregressive, run_workload},
        workload_manager::{WorkloadLease, register_module_incremental},
    },
    audio::{AudioSample, JitterBuffer, pcm_from_f32},
    base::{Epoch, Tensor},
    std::sync::Arc,
    uuid::Uuid,
};

pub const PHON_GRAPHEMES: &str = "phon_graphemes";
pub const PHON_TOKENS: &str = "phon_tokens";
pub const PHON_FINISHED: &str = "phon_finished";
pub const ENC_PHONEMES: &str = "enc_phonemes";
pub const ENC_EMOTIONS: &str = "enc_emotions";
pub const ENC_LANGUAGES: &str = "enc_languages";
pub const ENC_SPEED: &str = "enc_speed";
pub const ENC_LOUDNESS: &str = "enc_loudness";
pub const DEC_NBR_CHUNKS: &str = "dec_nbr_chunks";
pub const DEC_CHUNK_INDEX: &str = "dec_chunk_index";
pub const BOUNDARY_CLONE_ALPHA: &str = "boundary_clone_alpha";
pub const CHUNK_HOP: &str = "chunk_hop";
pub const AUDIO: &str = "audio";

/// What a finished session reports back to the engine.
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub result: Result<()>,
    /// Packets delivered, the terminal one included.
    pub packets: usize,
    pub warnings: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkPosition {
    First,
    Middle,
    Last,
}

impl ChunkPosition {
    fn of(index: usize, count: usize) -> Self {
        if index == 0 {
            ChunkPosition::First
        } else if index + 1 == count {
            ChunkPosition::Last
        } else {
            ChunkPosition::Middle
        }
    }
}

/// Resolved voice settings of one segment.
struct SegmentPlan {
    language: Arc<LanguageModule>,
    emotion: i64,
    speed: f32,
    loudness: f32,
}

/// One synthesis request running through the stage pipeline.
pub struct Session {
    ctx: SynthContext,
    request: SynthRequest,
    config: InferenceConfig,
    pool: TensorPool,
    budget: FrameBudget,
    jitter: Option<JitterBuffer>,
    actor: Option<Arc<ActorModule>>,
    plans: Vec<SegmentPlan>,
    languages: Vec<Arc<LanguageModule>>,
    markers: Vec<usize>,
    packets: usize,
    terminated: bool,
}

impl Session {
    pub fn new(ctx: SynthContext, request: SynthRequest, config: InferenceConfig, epoch: &Epoch) -> Self {
        let budget = FrameBudget::new(ctx.clock.clone());
        let jitter = request
            .audio_callback
            .as_ref()
            .map(|_| JitterBuffer::new(config.jitter_buffer_samples));
        Self {
            ctx,
            request,
            config,
            pool: TensorPool::with_epoch(epoch),
            budget,
            jitter,
            actor: None,
            plans: Vec::new(),
            languages: Vec::new(),
            markers: Vec::new(),
            packets: 0,
            terminated: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.request.id
    }

    /// Drive the whole pipeline. Ends in exactly one terminal packet.
    pub async fn run(mut self) -> SessionReport {
        log::info!(
            "Session {} started (actor {}, {} segments)",
            self.request.id,
            self.request.input.actor,
            self.request.input.segments.len()
        );
        let result = self.pipeline().await;
        self.pool.dispose_all();

        match &result {
            Ok(()) => log::info!(
                "Session {} finished ({} packets)",
                self.request.id,
                self.packets
            ),
            Err(error) => {
                log::error!("Session {} failed: {}", self.request.id, error);
                if let Some(jitter) = &mut self.jitter {
                    jitter.clear();
                }
                if !self.terminated {
                    let sample_rate = self.actor.as_ref().map_or(0, |a| a.sample_rate());
                    if let Some(audio) = &self.request.audio_callback {
                        audio(AudioSample::empty(sample_rate), true);
                    }
                    let mut packet =
                        DataPacket::failed(self.request.id, &self.request.input.actor, sample_rate);
                    packet.languages = self.language_ids();
                    self.deliver(packet);
                }
            }
        }

        SessionReport {
            id: self.request.id,
            result,
            packets: self.packets,
            warnings: std::mem::take(&mut self.request.warnings),
        }
    }

    async fn pipeline(&mut self) -> Result<()> {
        self.setup().await?;
        self.checkpoint()?;
        self.phonemize().await?;
        self.checkpoint()?;
        self.encode().await?;
        self.checkpoint()?;
        let chunks = self.preprocess_decoder().await?;
        self.chunk_loop(chunks).await
    }

    fn checkpoint(&self) -> Result<()> {
        if self.pool.is_disposed() {
            return Err(InferError::Disposed);
        }
        Ok(())
    }

    fn actor(&self) -> Result<Arc<ActorModule>> {
        self.actor
            .clone()
            .ok_or_else(|| InferError::Runtime("actor not loaded".to_string()))
    }

    fn language_ids(&self) -> Vec<String> {
        self.languages.iter().map(|l| l.id().to_string()).collect()
    }

    fn params(&self) -> SliceParams {
        SliceParams::from_config(&self.config, 1.0)
    }

    /// Load the actor and its languages, register their workloads and
    /// resolve per-segment language and emotion.
    async fn setup(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let actor = lock(&ctx.modules).acquire::<ActorModule>(&self.request.input.actor)?;
        self.actor = Some(Arc::clone(&actor));

        let default_language = if actor.speaks(&self.config.fallback_language) {
            self.config.fallback_language.clone()
        } else {
            actor.languages()[0].clone()
        };

        let mut plans = Vec::with_capacity(self.request.input.segments.len());
        for index in 0..self.request.input.segments.len() {
            let segment = self.request.input.segments[index].clone();
            let language_id = match &segment.language {
                Some(language) if actor.speaks(language) => language.clone(),
                Some(language) => {
                    self.request.warn(format!(
                        "segment {}: actor {} does not speak {}, using {}",
                        index,
                        actor.id(),
                        language,
                        default_language
                    ));
                    default_language.clone()
                }
                None => default_language.clone(),
            };
            let loaded = self.languages.iter().find(|l| l.id() == language_id).cloned();
            let language = match loaded {
                Some(language) => language,
                None => {
                    let language = lock(&ctx.modules).acquire::<LanguageModule>(&language_id)?;
                    self.languages.push(Arc::clone(&language));
                    language
                }
            };
            let emotion = self.resolve_emotion(&actor, index, segment.emotion.as_deref());
            let speed = if segment.speed > 0.0 { segment.speed } else { 1.0 };
            plans.push(SegmentPlan {
                language,
                emotion,
                speed,
                loudness: segment.loudness,
            });
        }
        self.plans = plans;

        register_module_incremental(
            &ctx.workloads,
            ctx.catalog.as_ref(),
            actor.id(),
            &actor.workloads().hashes(),
            &self.config,
            &mut self.budget,
            &self.pool,
        )
        .await?;
        for language in self.languages.clone() {
            register_module_incremental(
                &ctx.workloads,
                ctx.catalog.as_ref(),
                language.id(),
                &[language.phonemizer().to_string()],
                &self.config,
                &mut self.budget,
                &self.pool,
            )
            .await?;
        }
        Ok(())
    }

    fn resolve_emotion(&mut self, actor: &ActorModule, index: usize, requested: Option<&str>) -> i64 {
        let candidates = [
            requested,
            actor.descriptor().default_emotion.as_deref(),
            Some(self.config.fallback_emotion.as_str()),
        ];
        let found = candidates
            .iter()
            .flatten()
            .find_map(|name| actor.emotion_id(name).map(|id| (*name, id)));
        match (requested, found) {
            (Some(wanted), Some((used, id))) if wanted != used => {
                self.request.warn(format!(
                    "segment {}: unknown emotion {}, using {}",
                    index, wanted, used
                ));
                id
            }
            (_, Some((_, id))) => id,
            (_, None) => {
                self.request
                    .warn(format!("segment {}: actor {} has no usable emotion", index, actor.id()));
                0
            }
        }
    }

    /// Phonemize every word no lookup table knows, one batch per language.
    async fn phonemize(&mut self) -> Result<()> {
        for language in self.languages.clone() {
            let mut unknown: Vec<String> = Vec::new();
            for (plan, prepared) in self.plans.iter().zip(&self.request.prepared) {
                if plan.language.id() != language.id() {
                    continue;
                }
                for piece in split_words(&prepared.text) {
                    if let TextPiece::Word { text, .. } = piece {
                        let word = normalize_word(&text);
                        if !language.is_known(&word) && !unknown.contains(&word) {
                            unknown.push(word);
                        }
                    }
                }
            }
            if unknown.is_empty() {
                continue;
            }
            log::debug!(
                "Session {}: phonemizing {} words for {}",
                self.request.id,
                unknown.len(),
                language.id()
            );
            self.run_phonemizer(&language, &unknown).await?;
        }
        Ok(())
    }

    async fn run_phonemizer(&mut self, language: &LanguageModule, words: &[String]) -> Result<()> {
        let rows: Vec<Vec<i64>> = words.iter().map(|word| language.grapheme_ids(word)).collect();
        let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let pad = language.descriptor().pad_id;
        let graphemes: Vec<i64> = rows
            .iter()
            .flat_map(|row| row.iter().copied().chain(std::iter::repeat(pad)).take(width))
            .collect();
        self.pool
            .set_i64(PHON_GRAPHEMES, Tensor::new(vec![words.len(), width], graphemes)?)?;
        self.pool
            .set_i64(PHON_TOKENS, Tensor::new(vec![words.len(), 0], Vec::new())?)?;

        let lease = WorkloadLease::acquire(&self.ctx.workloads, language.phonemizer(), &self.pool).await?;
        lock(lease.workload()).limit_heavy_layers(self.config.max_skip_layers);
        let params = self.params();
        let cap = self.config.phonemizer_iteration_cap;
        let mut capped = false;
        let iterations = run_autoregressive(
            lease.workload(),
            &mut self.pool,
            &mut self.budget,
            &params,
            |pool, iterations| {
                let finished = pool.get_i64(PHON_FINISHED)?;
                if finished.data.iter().all(|&flag| flag != 0) {
                    return Ok(true);
                }
                if iterations >= cap {
                    capped = true;
                    return Ok(true);
                }
                Ok(false)
            },
        )
        .await?;
        drop(lease);

        if capped {
            self.request.warn(format!(
                "phonemizer for {} stopped at the iteration cap ({})",
                language.id(),
                cap
            ));
        }

        let tokens = self.pool.get_i64(PHON_TOKENS)?.clone();
        for (index, word) in words.iter().enumerate() {
            let phonemes = tokens.row(index).map(|row| language.decode(row)).unwrap_or_default();
            if phonemes.is_empty() {
                self.request
                    .warn(format!("phonemizer produced nothing for '{}'", word));
                continue;
            }
            language.memoize(word, phonemes);
        }
        log::debug!(
            "Session {}: phonemizer for {} ran {} iterations ({} words learned so far)",
            self.request.id,
            language.id(),
            iterations,
            language.learned_words()
        );
        Ok(())
    }

    /// Build the encoder inputs over all segments and run the encoder.
    async fn encode(&mut self) -> Result<()> {
        let actor = self.actor()?;
        let samples_per_symbol = self
            .config
            .marker_samples_per_symbol
            .unwrap_or(actor.descriptor().marker_samples_per_symbol);
        let mut aligner = MarkerAligner::new(1, samples_per_symbol);

        let first = self
            .plans
            .first()
            .ok_or_else(|| InferError::Runtime("request has no segments".to_string()))?;
        let mut phonemes = vec![actor.descriptor().start_symbol];
        let mut emotions = vec![first.emotion];
        let mut languages = vec![first.language.language_index()];
        let mut speed = vec![first.speed];
        let mut loudness = vec![first.loudness];

        let separator = actor.symbol_id(' ');
        let mut spoken = false;
        let mut gap = false;
        let mut warnings = Vec::new();
        for (index, (plan, prepared)) in self.plans.iter().zip(&self.request.prepared).enumerate() {
            // whitespace trimmed at a segment join still separates words
            gap |= prepared.leading_space;
            let speaks = !prepared.text.is_empty();
            if let Some(id) = separator.filter(|_| spoken && gap && speaks) {
                phonemes.push(id);
                emotions.push(plan.emotion);
                languages.push(plan.language.language_index());
                speed.push(plan.speed);
                loudness.push(plan.loudness);
                aligner.skip(1);
            }
            if speaks {
                spoken = true;
                gap = false;
            }
            gap |= prepared.trailing_space;

            let transcription = transcribe(
                prepared,
                |word| plan.language.lookup(word),
                |symbol| actor.symbol_id(symbol).is_some(),
            );
            for word in &transcription.missing {
                warnings.push(format!("segment {}: no phonemes for '{}', spelled out", index, word));
            }
            for symbol in &transcription.dropped {
                warnings.push(format!("segment {}: dropped unknown symbol {:?}", index, symbol));
            }
            aligner.push_segment(&transcription);
            aligner.carry(prepared.trailing_markers);
            for &symbol in &transcription.symbols {
                if let Some(id) = actor.symbol_id(symbol) {
                    phonemes.push(id);
                    emotions.push(plan.emotion);
                    languages.push(plan.language.language_index());
                    speed.push(plan.speed);
                    loudness.push(plan.loudness);
                }
            }
        }
        for warning in warnings {
            self.request.warn(warning);
        }

        phonemes.push(actor.descriptor().end_symbol);
        emotions.push(*emotions.last().unwrap_or(&0));
        languages.push(*languages.last().unwrap_or(&0));
        speed.push(*speed.last().unwrap_or(&1.0));
        loudness.push(*loudness.last().unwrap_or(&1.0));
        self.markers = aligner.sample_offsets();

        let shape = vec![1, phonemes.len()];
        self.pool.set_i64(ENC_PHONEMES, Tensor::new(shape.clone(), phonemes)?)?;
        self.pool.set_i64(ENC_EMOTIONS, Tensor::new(shape.clone(), emotions)?)?;
        self.pool.set_i64(ENC_LANGUAGES, Tensor::new(shape.clone(), languages)?)?;
        self.pool.set_f32(ENC_SPEED, Tensor::new(shape.clone(), speed)?)?;
        self.pool.set_f32(ENC_LOUDNESS, Tensor::new(shape, loudness)?)?;

        let hash = actor.workloads().encoder.clone();
        self.run_stage(&hash).await
    }

    async fn preprocess_decoder(&mut self) -> Result<usize> {
        let hash = self.actor()?.workloads().decoder_preprocess.clone();
        self.run_stage(&hash).await?;
        let chunks = self.pool.scalar_i64(DEC_NBR_CHUNKS)?;
        if chunks < 2 {
            log::error!(
                "Session {}: {} chunks is below the two chunk minimum",
                self.request.id,
                chunks
            );
            return Err(InferError::Unsupported(format!(
                "synthesis needs at least 2 chunks, decoder reported {}",
                chunks
            )));
        }
        Ok(chunks as usize)
    }

    async fn chunk_loop(&mut self, chunks: usize) -> Result<()> {
        let actor = self.actor()?;
        let workloads = actor.workloads().clone();
        for index in 0..chunks {
            self.checkpoint()?;
            let position = ChunkPosition::of(index, chunks);
            let (decoder, vocoder) = match position {
                ChunkPosition::First => (&workloads.decoder_first, &workloads.vocoder_first),
                ChunkPosition::Middle => (&workloads.decoder_middle, &workloads.vocoder_middle),
                ChunkPosition::Last => (&workloads.decoder_last, &workloads.vocoder_last),
            };

            self.pool
                .set_i64(DEC_CHUNK_INDEX, Tensor::from_scalar(index as i64))?;
            let alpha = if position == ChunkPosition::First { 0.0 } else { 1.0 };
            self.pool
                .set_f32(BOUNDARY_CLONE_ALPHA, Tensor::from_scalar(alpha))?;
            if position == ChunkPosition::Middle {
                self.pool
                    .set_i64(CHUNK_HOP, Tensor::from_scalar(actor.descriptor().chunk_hop))?;
            }

            self.run_stage(decoder).await?;
            self.run_stage(vocoder).await?;

            let samples = self.pool.take(AUDIO)?.to_f32();
            let audio = AudioSample::from_pcm(pcm_from_f32(&samples.data), actor.sample_rate());
            let is_final = position == ChunkPosition::Last;
            let markers = if index == 0 {
                std::mem::take(&mut self.markers)
            } else {
                Vec::new()
            };
            self.deliver(DataPacket {
                request_id: self.request.id,
                status: PacketStatus::Ok,
                is_final,
                audio,
                actor: actor.id().to_string(),
                languages: self.language_ids(),
                chunk_index: Some(index),
                markers,
            });
        }
        Ok(())
    }

    /// Acquire, run and release one non-autoregressive stage.
    async fn run_stage(&mut self, hash: &str) -> Result<()> {
        let lease = WorkloadLease::acquire(&self.ctx.workloads, hash, &self.pool).await?;
        lock(lease.workload()).limit_heavy_layers(self.config.max_skip_layers);
        let params = self.params();
        run_workload(lease.workload(), &mut self.pool, &mut self.budget, &params).await
    }

    fn deliver(&mut self, packet: DataPacket) {
        if let (Some(jitter), Some(callback)) = (&mut self.jitter, &self.request.audio_callback) {
            if packet.status == PacketStatus::Ok {
                match jitter.push(&packet.audio, packet.is_final) {
                    Ok(Some(block)) => callback(block, packet.is_final),
                    Ok(None) => {}
                    Err(error) => log::warn!("Session {}: jitter buffer: {}", self.request.id, error),
                }
            }
        }
        self.terminated |= packet.is_terminal();
        self.packets += 1;
        (self.request.callback)(packet);
    }
}
