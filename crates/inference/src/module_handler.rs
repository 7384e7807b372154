use {
    crate::{
        catalog::ModuleCatalog,
        error::{InferError, Result},
        module::{Module, ModuleType},
        workload_manager::WorkloadManager,
    },
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
};

/// Registry of loaded modules, keyed by module id.
pub struct ModuleHandler {
    catalog: Arc<dyn ModuleCatalog>,
    modules: HashMap<String, Module>,
}

impl ModuleHandler {
    pub fn new(catalog: Arc<dyn ModuleCatalog>) -> Self {
        Self {
            catalog,
            modules: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn ModuleCatalog> {
        &self.catalog
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(|id| id.as_str())
    }

    fn typed<T: ModuleType>(id: &str, module: &Module) -> Result<Arc<T>> {
        T::unwrap(module).ok_or_else(|| InferError::TypeMismatch {
            id: id.to_string(),
            expected: T::KIND.name(),
            found: module.kind().name(),
        })
    }

    /// The loaded module `id`, loading it from the catalog first if needed.
    pub fn acquire<T: ModuleType>(&mut self, id: &str) -> Result<Arc<T>> {
        if let Some(module) = self.modules.get(id) {
            return Self::typed(id, module);
        }
        let module = Arc::new(T::load(id, self.catalog.as_ref())?);
        self.modules.insert(id.to_string(), T::wrap(Arc::clone(&module)));
        log::info!("Loaded {} module {}", T::KIND, id);
        Ok(module)
    }

    pub fn get<T: ModuleType>(&self, id: &str) -> Result<Option<Arc<T>>> {
        self.modules
            .get(id)
            .map(|module| Self::typed(id, module))
            .transpose()
    }

    /// Remove and return module `id`. Absent modules are a no-op.
    pub fn deregister<T: ModuleType>(&mut self, id: &str) -> Result<Option<Arc<T>>> {
        let Some(module) = self.modules.get(id) else {
            return Ok(None);
        };
        let typed = Self::typed::<T>(id, module)?;
        self.modules.remove(id);
        Ok(Some(typed))
    }

    /// Resources of `id` that no other loaded module also uses.
    pub fn get_non_overlapping(&self, id: &str) -> Result<HashSet<String>> {
        let module = self
            .modules
            .get(id)
            .ok_or_else(|| InferError::NotFound(format!("module {}", id)))?;
        let siblings: HashSet<String> = self
            .modules
            .iter()
            .filter(|(other, _)| other.as_str() != id)
            .flat_map(|(_, module)| module.resource_ids())
            .collect();
        Ok(module
            .resource_ids()
            .into_iter()
            .filter(|resource| !siblings.contains(resource))
            .collect())
    }

    /// Remove module `id` and its exclusive workloads.
    ///
    /// When the manager refuses because a workload is in use the module is
    /// put back and false is returned; nothing changes.
    pub fn unload<T: ModuleType>(&mut self, id: &str, workloads: &mut WorkloadManager) -> Result<bool> {
        let Some(module) = self.deregister::<T>(id)? else {
            return Ok(false);
        };
        if !workloads.try_deregister(id) {
            self.modules.insert(id.to_string(), T::wrap(module));
            return Ok(false);
        }
        T::wrap(module).clear_tables();
        log::info!("Unloaded {} module {}", T::KIND, id);
        Ok(true)
    }

    /// Drop every module after clearing their runtime tables.
    pub fn clear(&mut self) {
        for module in self.modules.values() {
            module.clear_tables();
        }
        self.modules.clear();
    }
}
