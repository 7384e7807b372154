use {
    crate::{
        catalog::ModuleCatalog,
        config::{ConfigStore, InferenceConfig},
        context::SynthContext,
        error::{InferError, Result},
        frame::FrameClock,
        lock,
        module::{ActorModule, LanguageModule},
        packet::{AudioCallback, DataPacket, PacketCallback},
        request::{SynthInput, SynthRequest},
        session::{Session, SessionReport},
    },
    audio::AudioSample,
    base::Epoch,
    futures_util::task::noop_waker,
    std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
    },
    uuid::Uuid,
};

type SessionFuture = Pin<Box<dyn Future<Output = SessionReport> + Send>>;

// a failed request's audio stream ends with an empty final block
fn end_audio(audio: Option<&AudioCallback>) {
    if let Some(audio) = audio {
        audio(AudioSample::empty(0), true);
    }
}

struct Running {
    id: Uuid,
    actor: String,
    callback: PacketCallback,
    audio: Option<AudioCallback>,
    future: SessionFuture,
}

/// Serializes synthesis requests onto the host frame loop.
///
/// Call `update` once per host frame. At most one session runs at a time;
/// everything else waits in FIFO order.
pub struct Engine {
    ctx: SynthContext,
    configs: ConfigStore,
    queue: VecDeque<SynthRequest>,
    running: Option<Running>,
    epoch: Epoch,
}

impl Engine {
    pub fn new(catalog: Arc<dyn ModuleCatalog>, config: InferenceConfig) -> Result<Self> {
        Self::with_clock(catalog, config, FrameClock::monotonic())
    }

    pub fn with_clock(catalog: Arc<dyn ModuleCatalog>, config: InferenceConfig, clock: FrameClock) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ctx: SynthContext::new(catalog, clock),
            configs: ConfigStore::new(config),
            queue: VecDeque::new(),
            running: None,
            epoch: Epoch::new(),
        })
    }

    pub fn context(&self) -> &SynthContext {
        &self.ctx
    }

    pub fn clock(&self) -> &FrameClock {
        &self.ctx.clock
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.configs
    }

    pub fn set_global_config(&mut self, config: InferenceConfig) -> Result<()> {
        config.validate()?;
        self.configs.set_global(config);
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Validate and enqueue a request. Errors here produce no packet.
    pub fn submit(&mut self, input: SynthInput, callback: PacketCallback) -> Result<Uuid> {
        self.enqueue(SynthRequest::new(input, callback)?)
    }

    /// Like `submit`, also feeding raw audio through the jitter buffer to `audio`.
    pub fn submit_with_audio(
        &mut self,
        input: SynthInput,
        callback: PacketCallback,
        audio: AudioCallback,
    ) -> Result<Uuid> {
        self.enqueue(SynthRequest::new(input, callback)?.with_audio_callback(audio))
    }

    fn enqueue(&mut self, request: SynthRequest) -> Result<Uuid> {
        if !self.ctx.catalog.has_actor(&request.input.actor) {
            return Err(InferError::NotFound(format!("actor {}", request.input.actor)));
        }
        if let Some(local) = &request.input.local_config {
            self.configs.global().merged(local).validate()?;
            self.configs.set_local(request.id, local.clone());
        }
        let id = request.id;
        self.queue.push_back(request);
        log::debug!("Request {} queued ({} waiting)", id, self.queue.len());
        Ok(id)
    }

    fn start_next(&mut self) {
        let Some(request) = self.queue.pop_front() else {
            return;
        };
        let config = self.configs.resolve(&request.id);
        let running = Running {
            id: request.id,
            actor: request.input.actor.clone(),
            callback: Arc::clone(&request.callback),
            audio: request.audio_callback.clone(),
            future: Box::pin(Session::new(self.ctx.clone(), request, config, &self.epoch).run()),
        };
        self.running = Some(running);
    }

    fn poll_running(&mut self) -> Option<SessionReport> {
        let running = self.running.as_mut()?;
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match running.future.as_mut().poll(&mut cx) {
            Poll::Ready(report) => {
                self.running = None;
                self.configs.discard(&report.id);
                Some(report)
            }
            Poll::Pending => None,
        }
    }

    /// Advance one host frame. Returns the report of a session that finished during it.
    pub fn update(&mut self) -> Option<SessionReport> {
        self.ctx.clock.begin_frame();
        if self.running.is_none() {
            self.start_next();
        }
        self.poll_running()
    }

    /// Stop everything and drop all loaded state.
    ///
    /// The running session observes its disposed pool and fails, queued
    /// requests fail without starting, then workload flags are released,
    /// workloads disposed and modules cleared. Safe to call repeatedly.
    pub fn teardown(&mut self) -> Result<()> {
        self.epoch.advance();

        if self.running.is_some() {
            match self.poll_running() {
                Some(report) => log::info!("Session {} stopped by teardown", report.id),
                None => {
                    if let Some(running) = self.running.take() {
                        log::warn!("Session {} did not stop, dropping it", running.id);
                        end_audio(running.audio.as_ref());
                        (running.callback)(DataPacket::failed(running.id, running.actor, 0));
                        self.configs.discard(&running.id);
                    }
                }
            }
        }

        for request in self.queue.drain(..) {
            log::info!("Request {} cancelled by teardown", request.id);
            end_audio(request.audio_callback.as_ref());
            (request.callback)(DataPacket::failed(request.id, request.input.actor.clone(), 0));
            self.configs.discard(&request.id);
        }

        self.ctx.clear_all()
    }

    pub fn unload_actor(&mut self, id: &str) -> Result<bool> {
        if self.running.as_ref().is_some_and(|running| running.actor == id) {
            log::warn!("Cannot unload actor {} while it is speaking", id);
            return Ok(false);
        }
        let mut modules = lock(&self.ctx.modules);
        let mut workloads = lock(&self.ctx.workloads);
        modules.unload::<ActorModule>(id, &mut workloads)
    }

    pub fn unload_language(&mut self, id: &str) -> Result<bool> {
        let mut modules = lock(&self.ctx.modules);
        let mut workloads = lock(&self.ctx.workloads);
        modules.unload::<LanguageModule>(id, &mut workloads)
    }

    /// Dispose workloads no module references anymore.
    pub fn collect_unreferenced(&mut self) -> usize {
        lock(&self.ctx.workloads).collect_unreferenced()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(error) = self.teardown() {
            log::error!("Engine teardown failed: {}", error);
        }
    }
}
