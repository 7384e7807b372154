use {
    crate::error::{InferError, Result},
    base::{Epoch, EpochStamp, Tensor},
    std::collections::HashMap,
};

/// Element type of a pooled tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    F32,
    I64,
}

/// A tensor as exchanged between the session and tensor programs.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorValue {
    F32(Tensor<f32>),
    I64(Tensor<i64>),
}

impl TensorValue {
    pub fn element_type(&self) -> ElementType {
        match self {
            TensorValue::F32(_) => ElementType::F32,
            TensorValue::I64(_) => ElementType::I64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TensorValue::F32(tensor) => &tensor.shape,
            TensorValue::I64(tensor) => &tensor.shape,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorValue::F32(tensor) => tensor.len(),
            TensorValue::I64(tensor) => tensor.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Result<&Tensor<f32>> {
        match self {
            TensorValue::F32(tensor) => Ok(tensor),
            TensorValue::I64(_) => Err(InferError::Shape("expected f32 tensor, found i64".to_string())),
        }
    }

    pub fn as_i64(&self) -> Result<&Tensor<i64>> {
        match self {
            TensorValue::I64(tensor) => Ok(tensor),
            TensorValue::F32(_) => Err(InferError::Shape("expected i64 tensor, found f32".to_string())),
        }
    }

    /// Values widened to f32 regardless of element type.
    pub fn to_f32(&self) -> Tensor<f32> {
        match self {
            TensorValue::F32(tensor) => tensor.clone(),
            TensorValue::I64(tensor) => tensor.map(|&v| v as f32),
        }
    }
}

impl From<Tensor<f32>> for TensorValue {
    fn from(tensor: Tensor<f32>) -> Self {
        TensorValue::F32(tensor)
    }
}

impl From<Tensor<i64>> for TensorValue {
    fn from(tensor: Tensor<i64>) -> Self {
        TensorValue::I64(tensor)
    }
}

/// Something the pool owns and must release explicitly.
pub trait PoolResource {
    fn dispose(&mut self) -> Result<()>;
}

impl PoolResource for TensorValue {
    fn dispose(&mut self) -> Result<()> {
        match self {
            TensorValue::F32(tensor) => {
                tensor.data = Vec::new();
                tensor.shape.clear();
            }
            TensorValue::I64(tensor) => {
                tensor.data = Vec::new();
                tensor.shape.clear();
            }
        }
        Ok(())
    }
}

/// Owner of every intermediate tensor of one inference session.
///
/// At most one tensor lives under each name; replacing it disposes the old
/// one first. Once disposed, the pool rejects all further access. A pool
/// created with an epoch stamp also reads as disposed after that epoch
/// advances, which is how external teardown reaches a running session.
pub struct TensorPool<R: PoolResource = TensorValue> {
    tensors: HashMap<String, R>,
    disposed: bool,
    stamp: Option<EpochStamp>,
}

impl<R: PoolResource> TensorPool<R> {
    pub fn new() -> Self {
        Self {
            tensors: HashMap::new(),
            disposed: false,
            stamp: None,
        }
    }

    pub fn with_epoch(epoch: &Epoch) -> Self {
        Self {
            tensors: HashMap::new(),
            disposed: false,
            stamp: Some(epoch.stamp()),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed || self.stamp.as_ref().is_some_and(|stamp| stamp.is_stale())
    }

    fn check(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(InferError::Disposed);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&R> {
        self.check()?;
        self.tensors
            .get(name)
            .ok_or_else(|| InferError::NotFound(format!("tensor '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.is_disposed() && self.tensors.contains_key(name)
    }

    /// Store `value` under `name`, disposing whatever was there before.
    ///
    /// If disposing the previous tensor fails, the whole pool is disposed and
    /// the error is returned.
    pub fn set(&mut self, name: impl Into<String>, mut value: R) -> Result<()> {
        self.check()?;
        let name = name.into();
        if let Some(mut previous) = self.tensors.remove(&name) {
            if let Err(error) = previous.dispose() {
                log::error!("Failed to dispose tensor '{}': {}", name, error);
                value.dispose().ok();
                self.dispose_all();
                return Err(error);
            }
        }
        self.tensors.insert(name, value);
        Ok(())
    }

    /// Remove a tensor and hand its ownership to the caller.
    pub fn take(&mut self, name: &str) -> Result<R> {
        self.check()?;
        self.tensors
            .remove(name)
            .ok_or_else(|| InferError::NotFound(format!("tensor '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Dispose every tensor and mark the pool disposed. Safe to call repeatedly.
    pub fn dispose_all(&mut self) {
        self.disposed = true;
        for (name, mut tensor) in self.tensors.drain() {
            if let Err(error) = tensor.dispose() {
                log::warn!("Failed to dispose tensor '{}': {}", name, error);
            }
        }
    }
}

impl<R: PoolResource> Default for TensorPool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: PoolResource> Drop for TensorPool<R> {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

impl TensorPool<TensorValue> {
    pub fn get_f32(&self, name: &str) -> Result<&Tensor<f32>> {
        self.get(name)?.as_f32()
    }

    pub fn get_i64(&self, name: &str) -> Result<&Tensor<i64>> {
        self.get(name)?.as_i64()
    }

    pub fn set_f32(&mut self, name: impl Into<String>, tensor: Tensor<f32>) -> Result<()> {
        self.set(name, TensorValue::F32(tensor))
    }

    pub fn set_i64(&mut self, name: impl Into<String>, tensor: Tensor<i64>) -> Result<()> {
        self.set(name, TensorValue::I64(tensor))
    }

    /// Read the first element of an i64 tensor.
    pub fn scalar_i64(&self, name: &str) -> Result<i64> {
        self.get_i64(name)?
            .data
            .first()
            .copied()
            .ok_or_else(|| InferError::Shape(format!("tensor '{}' is empty", name)))
    }
}
