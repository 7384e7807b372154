use {
    crate::{
        catalog::ModuleCatalog,
        config::InferenceConfig,
        error::{InferError, Result},
        frame::{FrameBudget, yield_frame},
        lock,
        tensor_pool::TensorPool,
        workload::Workload,
    },
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Mutex},
    },
};

pub type SharedWorkloads = Arc<Mutex<WorkloadManager>>;

/// Process-wide registry of workloads keyed by content hash.
///
/// Existence and availability are tracked separately: a workload stays
/// registered while any module references it, but only one stage at a time
/// may hold it (the in-use set).
#[derive(Default)]
pub struct WorkloadManager {
    workloads: HashMap<String, Arc<Mutex<Workload>>>,
    in_use: HashSet<String>,
    modules: HashMap<String, Vec<String>>,
}

impl WorkloadManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedWorkloads {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.workloads.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    pub fn get(&self, hash: &str) -> Option<Arc<Mutex<Workload>>> {
        self.workloads.get(hash).cloned()
    }

    /// True when the module was recorded and all of its workloads exist.
    pub fn is_registered(&self, module: &str) -> bool {
        self.modules
            .get(module)
            .is_some_and(|hashes| hashes.iter().all(|hash| self.contains(hash)))
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(|id| id.as_str())
    }

    /// Hashes from `hashes` that have no workload yet.
    pub fn missing(&self, hashes: &[String]) -> Vec<String> {
        hashes
            .iter()
            .filter(|hash| !self.contains(hash))
            .cloned()
            .collect()
    }

    /// Store a freshly loaded workload. An existing workload under the same hash wins.
    pub fn insert(&mut self, workload: Workload) -> bool {
        if self.contains(workload.hash()) {
            return false;
        }
        log::debug!(
            "Registered workload {} ({} layers)",
            workload.hash(),
            workload.layer_count()
        );
        self.workloads
            .insert(workload.hash().to_string(), Arc::new(Mutex::new(workload)));
        true
    }

    /// Remember which hashes `module` references.
    pub fn record_module(&mut self, module: &str, hashes: &[String]) {
        self.modules.insert(module.to_string(), hashes.to_vec());
    }

    /// Load every workload `module` needs that is not present yet.
    ///
    /// Nothing is stored unless all of them load. Returns the number of
    /// workloads created.
    pub fn register_module(
        &mut self,
        module: &str,
        hashes: &[String],
        catalog: &dyn ModuleCatalog,
        config: &InferenceConfig,
    ) -> Result<usize> {
        if self.is_registered(module) {
            return Ok(0);
        }
        let mut loaded = Vec::new();
        for hash in self.missing(hashes) {
            let program = catalog.load_program(&hash, config.preferred_backend)?;
            loaded.push(Workload::new(hash, program, config.max_skip_layers));
        }
        let count = loaded.len();
        for workload in loaded {
            self.insert(workload);
        }
        self.record_module(module, hashes);
        log::info!("Module {} registered ({} new workloads)", module, count);
        Ok(count)
    }

    /// Check out a workload for exclusive use.
    pub fn acquire(&mut self, hash: &str) -> Result<Arc<Mutex<Workload>>> {
        let workload = self
            .workloads
            .get(hash)
            .cloned()
            .ok_or_else(|| InferError::NotFound(format!("workload {}", hash)))?;
        if !self.in_use.insert(hash.to_string()) {
            return Err(InferError::AlreadyInUse(hash.to_string()));
        }
        Ok(workload)
    }

    pub fn release(&mut self, hash: &str) {
        self.in_use.remove(hash);
    }

    pub fn is_in_use(&self, hash: &str) -> bool {
        self.in_use.contains(hash)
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Hashes referenced by `module` and by no other registered module.
    pub fn exclusive_hashes(&self, module: &str) -> HashSet<String> {
        let Some(own) = self.modules.get(module) else {
            return HashSet::new();
        };
        let shared: HashSet<&String> = self
            .modules
            .iter()
            .filter(|(id, _)| id.as_str() != module)
            .flat_map(|(_, hashes)| hashes.iter())
            .collect();
        own.iter()
            .filter(|hash| !shared.contains(hash))
            .cloned()
            .collect()
    }

    /// Forget `module` and dispose the workloads only it used.
    ///
    /// Refuses, leaving everything untouched, when one of those workloads is
    /// checked out.
    pub fn try_deregister(&mut self, module: &str) -> bool {
        if !self.modules.contains_key(module) {
            return true;
        }
        let exclusive = self.exclusive_hashes(module);
        if let Some(busy) = exclusive.iter().find(|hash| self.is_in_use(hash)) {
            log::warn!(
                "Cannot deregister module {}: workload {} is in use",
                module,
                busy
            );
            return false;
        }
        for hash in &exclusive {
            self.remove(hash);
        }
        self.modules.remove(module);
        log::info!(
            "Module {} deregistered ({} workloads disposed)",
            module,
            exclusive.len()
        );
        true
    }

    fn remove(&mut self, hash: &str) {
        if let Some(workload) = self.workloads.remove(hash) {
            lock(&workload).dispose();
        }
    }

    /// Dispose workloads no registered module references and nobody holds.
    pub fn collect_unreferenced(&mut self) -> usize {
        let referenced: HashSet<&String> = self.modules.values().flatten().collect();
        let orphans: Vec<String> = self
            .workloads
            .keys()
            .filter(|hash| !referenced.contains(hash) && !self.in_use.contains(*hash))
            .cloned()
            .collect();
        for hash in &orphans {
            self.remove(hash);
        }
        if !orphans.is_empty() {
            log::debug!("Collected {} unreferenced workloads", orphans.len());
        }
        orphans.len()
    }

    pub fn release_all(&mut self) {
        if !self.in_use.is_empty() {
            log::debug!("Releasing {} in-use workloads", self.in_use.len());
        }
        self.in_use.clear();
    }

    /// Dispose every workload and forget every module.
    pub fn dispose_and_clear_all(&mut self) -> Result<()> {
        if !self.in_use.is_empty() {
            let mut busy: Vec<&str> = self.in_use.iter().map(|h| h.as_str()).collect();
            busy.sort();
            log::error!("Disposing workloads while in use: {:?}", busy);
            return Err(InferError::InUse(busy.join(", ")));
        }
        for (_, workload) in self.workloads.drain() {
            lock(&workload).dispose();
        }
        self.modules.clear();
        Ok(())
    }
}

/// Load the missing workloads of `module` one at a time, yielding to the
/// host whenever the frame budget is spent.
pub async fn register_module_incremental(
    manager: &SharedWorkloads,
    catalog: &dyn ModuleCatalog,
    module: &str,
    hashes: &[String],
    config: &InferenceConfig,
    budget: &mut FrameBudget,
    pool: &TensorPool,
) -> Result<usize> {
    if lock(manager).is_registered(module) {
        return Ok(0);
    }
    let missing = lock(manager).missing(hashes);
    let mut count = 0;
    for hash in missing {
        if budget.consumed() > config.budget()
            || budget.clock().since_frame_start() > config.frame_time()
        {
            yield_frame().await;
            if pool.is_disposed() {
                return Err(InferError::Disposed);
            }
        }
        let start = budget.clock().now();
        let program = catalog.load_program(&hash, config.preferred_backend)?;
        let workload = Workload::new(hash, program, config.max_skip_layers);
        budget.charge(budget.clock().now().saturating_sub(start));
        if lock(manager).insert(workload) {
            count += 1;
        }
    }
    lock(manager).record_module(module, hashes);
    log::info!("Module {} registered ({} new workloads)", module, count);
    Ok(count)
}

/// Exclusive hold on a workload; released when dropped.
pub struct WorkloadLease {
    hash: String,
    workload: Arc<Mutex<Workload>>,
    manager: SharedWorkloads,
}

impl WorkloadLease {
    pub fn try_acquire(manager: &SharedWorkloads, hash: &str) -> Result<Self> {
        let workload = lock(manager).acquire(hash)?;
        Ok(Self {
            hash: hash.to_string(),
            workload,
            manager: Arc::clone(manager),
        })
    }

    /// Acquire `hash`, retrying once per frame while another stage holds it.
    pub async fn acquire(manager: &SharedWorkloads, hash: &str, pool: &TensorPool) -> Result<Self> {
        let mut waited = 0usize;
        loop {
            match Self::try_acquire(manager, hash) {
                Ok(lease) => {
                    if waited > 0 {
                        log::debug!("Acquired workload {} after {} frames", hash, waited);
                    }
                    return Ok(lease);
                }
                Err(InferError::AlreadyInUse(_)) => {
                    if waited == 0 {
                        log::debug!("Workload {} in use, waiting", hash);
                    }
                }
                Err(error) => return Err(error),
            }
            yield_frame().await;
            waited += 1;
            if pool.is_disposed() {
                return Err(InferError::Disposed);
            }
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn workload(&self) -> &Mutex<Workload> {
        &self.workload
    }
}

impl Drop for WorkloadLease {
    fn drop(&mut self) {
        lock(&self.manager).release(&self.hash);
    }
}
