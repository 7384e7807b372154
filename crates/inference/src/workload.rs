use {
    crate::{
        config::{EvictionPolicy, InferenceConfig},
        error::{InferError, Result},
        frame::{FrameBudget, yield_frame},
        lock,
        program::TensorProgram,
        tensor_pool::TensorPool,
    },
    rand::Rng,
    std::{sync::Mutex, time::Duration},
};

/// Bounded set of layer indices after which a pass deliberately yields.
#[derive(Debug, Default)]
pub struct HeavyLayers {
    slots: Vec<usize>,
    capacity: usize,
    next_eviction: usize,
}

impl HeavyLayers {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next_eviction: 0,
        }
    }

    pub fn contains(&self, layer: usize) -> bool {
        self.slots.contains(&layer)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn layers(&self) -> &[usize] {
        &self.slots
    }

    /// Shrink or grow the capacity, dropping the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.capacity {
            return;
        }
        if self.slots.len() > capacity {
            let excess = self.slots.len() - capacity;
            self.slots.drain(..excess);
        }
        self.capacity = capacity;
        self.next_eviction = 0;
    }

    /// Add `layer`, replacing an existing slot when full. Returns the evicted layer.
    pub fn record(&mut self, layer: usize, policy: EvictionPolicy) -> Option<usize> {
        if self.capacity == 0 || self.contains(layer) {
            return None;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(layer);
            return None;
        }
        let slot = match policy {
            EvictionPolicy::Oldest => {
                let slot = self.next_eviction % self.slots.len();
                self.next_eviction = (slot + 1) % self.slots.len();
                slot
            }
            EvictionPolicy::Random => rand::thread_rng().gen_range(0..self.slots.len()),
        };
        Some(std::mem::replace(&mut self.slots[slot], layer))
    }
}

/// Scheduling limits applied to one workload pass.
#[derive(Clone, Debug)]
pub struct SliceParams {
    pub frame_time: Duration,
    pub budget: Duration,
    pub overshoot_margin: f64,
    pub adaptive: bool,
    pub eviction: EvictionPolicy,
}

impl SliceParams {
    /// Limits from `config`, with the per-frame budget scaled by `budget_adjustment`.
    pub fn from_config(config: &InferenceConfig, budget_adjustment: f64) -> Self {
        Self {
            frame_time: config.frame_time(),
            budget: config.budget().mul_f64(budget_adjustment.max(0.0)),
            overshoot_margin: config.overshoot_margin,
            adaptive: config.use_adaptive_scheduling,
            eviction: config.eviction_policy,
        }
    }

    fn overshoot_limit(&self) -> Duration {
        self.budget.mul_f64(self.overshoot_margin)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceOutcome {
    /// Layers remain; the pass continues next frame.
    Yielded,
    Finished,
}

/// One compiled tensor program plus its learned heavy layers.
pub struct Workload {
    hash: String,
    program: Box<dyn TensorProgram>,
    heavy: HeavyLayers,
    disposed: bool,
}

impl Workload {
    pub fn new(hash: impl Into<String>, program: Box<dyn TensorProgram>, max_skip_layers: usize) -> Self {
        Self {
            hash: hash.into(),
            program,
            heavy: HeavyLayers::new(max_skip_layers),
            disposed: false,
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn input_names(&self) -> &[String] {
        self.program.input_names()
    }

    pub fn output_names(&self) -> &[String] {
        self.program.output_names()
    }

    pub fn layer_count(&self) -> usize {
        self.program.layer_count()
    }

    pub fn heavy_layers(&self) -> &HeavyLayers {
        &self.heavy
    }

    /// Apply the caller's `max_skip_layers` before a pass.
    pub fn limit_heavy_layers(&mut self, max_skip_layers: usize) {
        if self.heavy.capacity() != max_skip_layers {
            log::debug!(
                "Workload {}: heavy layer capacity {} -> {}",
                self.hash,
                self.heavy.capacity(),
                max_skip_layers
            );
            self.heavy.set_capacity(max_skip_layers);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn check(&self) -> Result<()> {
        if self.disposed {
            return Err(InferError::Runtime(format!("workload {} is disposed", self.hash)));
        }
        Ok(())
    }

    /// Bind every declared input from the pool and reset the layer cursor.
    pub fn bind_inputs(&mut self, pool: &TensorPool) -> Result<()> {
        self.check()?;
        let names = self.program.input_names().to_vec();
        for name in &names {
            let value = pool.get(name)?;
            self.program.bind(name, value)?;
        }
        self.program.start()
    }

    /// Step layers until the pass ends, the frame or budget runs out, or a heavy layer is reached.
    pub fn run_slice(&mut self, params: &SliceParams, budget: &mut FrameBudget) -> Result<SliceOutcome> {
        self.check()?;
        let clock = budget.clock().clone();
        let already_spent = budget.consumed();
        let loop_start = clock.now();
        let first_layer = self.program.current_layer();
        let reserve = params.frame_time / 10;

        loop {
            let layer = self.program.current_layer();
            let more = self.program.step()?;

            let elapsed = clock.now().saturating_sub(loop_start);
            let spent = already_spent + elapsed;
            let frame_exhausted = clock.since_frame_start() + reserve > params.frame_time;
            let budget_exhausted = spent > params.budget;
            let heavy_break = params.adaptive && more && self.heavy.contains(layer);

            if !more || budget_exhausted || frame_exhausted || heavy_break {
                budget.charge(elapsed);
                if params.adaptive && spent > params.overshoot_limit() {
                    self.learn_heavy_layer(layer, first_layer, params.eviction);
                }
                return Ok(if more {
                    SliceOutcome::Yielded
                } else {
                    SliceOutcome::Finished
                });
            }
        }
    }

    // the slice overshot after executing `last`, break one or two layers earlier next time
    fn learn_heavy_layer(&mut self, last: usize, first: usize, policy: EvictionPolicy) {
        let candidate = [1usize, 2]
            .iter()
            .filter_map(|&back| last.checked_sub(back))
            .find(|&layer| layer >= first && !self.heavy.contains(layer));
        if let Some(layer) = candidate {
            let evicted = self.heavy.record(layer, policy);
            log::debug!(
                "Workload {}: recorded heavy layer {} (evicted {:?}, {} tracked)",
                self.hash,
                layer,
                evicted,
                self.heavy.len()
            );
        }
    }

    pub fn request_outputs(&mut self) -> Result<()> {
        self.check()?;
        let names = self.program.output_names().to_vec();
        for name in &names {
            self.program.request_output(name)?;
        }
        Ok(())
    }

    /// Move every output whose readback finished into the pool. Returns true when none remain.
    pub fn poll_outputs(&mut self, pool: &mut TensorPool, pending: &mut Vec<String>) -> Result<bool> {
        self.check()?;
        let mut still_pending = Vec::new();
        for name in pending.drain(..) {
            match self.program.poll_output(&name)? {
                Some(value) => pool.set(name, value)?,
                None => still_pending.push(name),
            }
        }
        *pending = still_pending;
        Ok(pending.is_empty())
    }

    pub fn dispose(&mut self) {
        if !self.disposed {
            self.program.dispose();
            self.disposed = true;
        }
    }
}

impl Drop for Workload {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_pass(
    workload: &Mutex<Workload>,
    pool: &mut TensorPool,
    budget: &mut FrameBudget,
    params: &SliceParams,
) -> Result<()> {
    lock(workload).bind_inputs(pool)?;

    loop {
        let outcome = lock(workload).run_slice(params, budget)?;
        if outcome == SliceOutcome::Finished {
            break;
        }
        yield_frame().await;
        if pool.is_disposed() {
            return Err(InferError::Disposed);
        }
    }

    let mut pending = {
        let mut workload = lock(workload);
        workload.request_outputs()?;
        workload.output_names().to_vec()
    };
    loop {
        if lock(workload).poll_outputs(pool, &mut pending)? {
            return Ok(());
        }
        yield_frame().await;
        if pool.is_disposed() {
            return Err(InferError::Disposed);
        }
    }
}

/// Run one full pass of `workload`, yielding to the host whenever a slice ends.
///
/// On any failure the pool is disposed before the error is returned.
pub async fn run_workload(
    workload: &Mutex<Workload>,
    pool: &mut TensorPool,
    budget: &mut FrameBudget,
    params: &SliceParams,
) -> Result<()> {
    let result = run_pass(workload, pool, budget, params).await;
    if let Err(error) = &result {
        let hash = lock(workload).hash().to_string();
        log::error!("Workload {} failed: {}", hash, error);
        pool.dispose_all();
    }
    result
}

/// Re-run `workload` until `done(pool, iterations)` returns true.
///
/// Every iteration after the first starts in a fresh frame. Returns the
/// number of iterations executed.
pub async fn run_autoregressive<F>(
    workload: &Mutex<Workload>,
    pool: &mut TensorPool,
    budget: &mut FrameBudget,
    params: &SliceParams,
    mut done: F,
) -> Result<usize>
where
    F: FnMut(&TensorPool, usize) -> Result<bool>,
{
    let mut iterations = 0;
    loop {
        run_workload(workload, pool, budget, params).await?;
        iterations += 1;
        match done(pool, iterations) {
            Ok(true) => return Ok(iterations),
            Ok(false) => {}
            Err(error) => {
                log::error!("Completion check failed after {} iterations: {}", iterations, error);
                pool.dispose_all();
                return Err(error);
            }
        }
        yield_frame().await;
        if pool.is_disposed() {
            return Err(InferError::Disposed);
        }
    }
}
