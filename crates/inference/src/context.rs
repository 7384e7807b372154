use {
    crate::{
        catalog::ModuleCatalog,
        frame::FrameClock,
        lock,
        module_handler::ModuleHandler,
        workload_manager::{SharedWorkloads, WorkloadManager},
    },
    std::sync::{Arc, Mutex},
};

/// Shared state of one synthesis context: catalog, loaded modules,
/// registered workloads and the host frame clock.
#[derive(Clone)]
pub struct SynthContext {
    pub catalog: Arc<dyn ModuleCatalog>,
    pub modules: Arc<Mutex<ModuleHandler>>,
    pub workloads: SharedWorkloads,
    pub clock: FrameClock,
}

impl SynthContext {
    pub fn new(catalog: Arc<dyn ModuleCatalog>, clock: FrameClock) -> Self {
        Self {
            modules: Arc::new(Mutex::new(ModuleHandler::new(Arc::clone(&catalog)))),
            workloads: WorkloadManager::shared(),
            catalog,
            clock,
        }
    }

    /// Release every flag, dispose every workload, then drop modules and their tables.
    pub fn clear_all(&self) -> crate::Result<()> {
        let mut workloads = lock(&self.workloads);
        workloads.release_all();
        workloads.dispose_and_clear_all()?;
        drop(workloads);
        lock(&self.modules).clear();
        Ok(())
    }
}
