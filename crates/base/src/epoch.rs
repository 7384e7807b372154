use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// A shared generation counter used to invalidate in-flight work.
///
/// Everything created while the epoch had a given value can compare that
/// value against `current()` later. After `advance()` every holder of an
/// older value knows its work belongs to a torn-down generation.
#[derive(Clone, Debug)]
pub struct Epoch {
    value: Arc<AtomicU64>,
}

impl Epoch {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Get the current epoch value.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance to the next epoch and return the new value.
    pub fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Check if the given epoch is still current.
    pub fn is_current(&self, epoch: u64) -> bool {
        epoch == self.current()
    }

    /// Capture the current value as a stamp.
    pub fn stamp(&self) -> EpochStamp {
        EpochStamp {
            epoch: self.clone(),
            value: self.current(),
        }
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

/// An epoch value captured at creation time, together with the epoch it came from.
#[derive(Clone, Debug)]
pub struct EpochStamp {
    epoch: Epoch,
    value: u64,
}

impl EpochStamp {
    pub fn value(&self) -> u64 {
        self.value
    }

    /// True once the originating epoch has advanced past this stamp.
    pub fn is_stale(&self) -> bool {
        !self.epoch.is_current(self.value)
    }
}
