use {
    crate::{
        candle_program::{CandleProgram, ProgramDescriptor},
        config::Backend,
        error::{InferError, Result},
        module::{ActorDescriptor, LanguageDescriptor},
        program::TensorProgram,
    },
    sha2::{Digest, Sha256},
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Read-only source of module metadata and compiled programs.
pub trait ModuleCatalog: Send + Sync {
    fn actor(&self, id: &str) -> Result<ActorDescriptor>;

    fn language(&self, id: &str) -> Result<LanguageDescriptor>;

    /// Compile the program stored under content hash `hash`.
    fn load_program(&self, hash: &str, backend: Backend) -> Result<Box<dyn TensorProgram>>;

    fn has_actor(&self, id: &str) -> bool {
        self.actor(id).is_ok()
    }
}

/// Hex SHA-256 digest, the content hash of a program.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Catalog rooted at a directory:
///
/// ```text
/// actors/<id>.json
/// languages/<id>.json
/// programs/<hash>.json
/// programs/<hash>.safetensors
/// ```
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(InferError::NotFound(format!(
                "catalog directory {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: PathBuf, what: String) -> Result<Vec<u8>> {
        if !path.is_file() {
            return Err(InferError::NotFound(what));
        }
        Ok(std::fs::read(path)?)
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, dir: &str, id: &str) -> Result<T> {
        check_entry_name(id)?;
        let bytes = self.read(
            self.root.join(dir).join(format!("{}.json", id)),
            format!("{} {}", dir.trim_end_matches('s'), id),
        )?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ids become file names, so they must stay a single plain path component
fn check_entry_name(id: &str) -> Result<()> {
    let plain = !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0']);
    if !plain {
        return Err(InferError::NotFound(format!("invalid catalog id '{}'", id)));
    }
    Ok(())
}

impl ModuleCatalog for FileCatalog {
    fn actor(&self, id: &str) -> Result<ActorDescriptor> {
        self.read_json("actors", id)
    }

    fn language(&self, id: &str) -> Result<LanguageDescriptor> {
        self.read_json("languages", id)
    }

    fn load_program(&self, hash: &str, backend: Backend) -> Result<Box<dyn TensorProgram>> {
        check_entry_name(hash)?;
        let programs = self.root.join("programs");
        let weights = self.read(
            programs.join(format!("{}.safetensors", hash)),
            format!("program weights {}", hash),
        )?;
        let digest = content_hash(&weights);
        if digest != hash {
            return Err(InferError::Runtime(format!(
                "program {} fails its checksum (got {})",
                hash, digest
            )));
        }
        let descriptor = self.read(
            programs.join(format!("{}.json", hash)),
            format!("program descriptor {}", hash),
        )?;
        let descriptor = ProgramDescriptor::from_json(&String::from_utf8_lossy(&descriptor))?;
        log::debug!(
            "Loading program {} ({} layers) from {}",
            hash,
            descriptor.layers.len(),
            programs.display()
        );
        Ok(Box::new(CandleProgram::load(descriptor, &weights, backend)?))
    }
}

pub type ProgramFactory = Arc<dyn Fn(Backend) -> Result<Box<dyn TensorProgram>> + Send + Sync>;

/// Catalog held in memory, filled before it is shared.
#[derive(Default, Clone)]
pub struct MemoryCatalog {
    actors: HashMap<String, ActorDescriptor>,
    languages: HashMap<String, LanguageDescriptor>,
    programs: HashMap<String, ProgramFactory>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_actor(&mut self, descriptor: ActorDescriptor) {
        self.actors.insert(descriptor.id.clone(), descriptor);
    }

    pub fn add_language(&mut self, descriptor: LanguageDescriptor) {
        self.languages.insert(descriptor.id.clone(), descriptor);
    }

    pub fn add_program<F>(&mut self, hash: impl Into<String>, factory: F)
    where
        F: Fn(Backend) -> Result<Box<dyn TensorProgram>> + Send + Sync + 'static,
    {
        self.programs.insert(hash.into(), Arc::new(factory));
    }

    pub fn has_program(&self, hash: &str) -> bool {
        self.programs.contains_key(hash)
    }
}

impl ModuleCatalog for MemoryCatalog {
    fn actor(&self, id: &str) -> Result<ActorDescriptor> {
        self.actors
            .get(id)
            .cloned()
            .ok_or_else(|| InferError::NotFound(format!("actor {}", id)))
    }

    fn language(&self, id: &str) -> Result<LanguageDescriptor> {
        self.languages
            .get(id)
            .cloned()
            .ok_or_else(|| InferError::NotFound(format!("language {}", id)))
    }

    fn load_program(&self, hash: &str, backend: Backend) -> Result<Box<dyn TensorProgram>> {
        let factory = self
            .programs
            .get(hash)
            .ok_or_else(|| InferError::NotFound(format!("program {}", hash)))?;
        factory(backend)
    }

    fn has_actor(&self, id: &str) -> bool {
        self.actors.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_memory_catalog_missing_entries() {
        let catalog = MemoryCatalog::new();
        assert!(matches!(catalog.actor("nobody"), Err(InferError::NotFound(_))));
        assert!(matches!(
            catalog.load_program("deadbeef", Backend::Cpu),
            Err(InferError::NotFound(_))
        ));
    }
}
