pub mod candle_program;
pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod marker;
pub mod module;
pub mod module_handler;
pub mod packet;
pub mod phoneme;
pub mod program;
pub mod request;
pub mod session;
pub mod synthetic;
pub mod tensor_pool;
pub mod workload;
pub mod workload_manager;

pub use {
    catalog::{FileCatalog, MemoryCatalog, ModuleCatalog},
    config::{Backend, ConfigStore, EvictionPolicy, InferenceConfig, LocalConfig},
    context::SynthContext,
    engine::Engine,
    error::{InferError, Result},
    frame::{FrameBudget, FrameClock, FrameDriver, ManualTime, MonotonicTime, TimeSource, yield_frame},
    marker::MARKER_CHAR,
    module::{ActorDescriptor, ActorModule, LanguageDescriptor, LanguageModule, Module, ModuleKind, ModuleType},
    module_handler::ModuleHandler,
    packet::{AudioCallback, DataPacket, PacketCallback, PacketListener, PacketStatus, packet_channel},
    program::TensorProgram,
    request::{Segment, SynthInput, SynthRequest},
    session::SessionReport,
    tensor_pool::{TensorPool, TensorValue},
    workload::{HeavyLayers, SliceParams, Workload},
    workload_manager::{SharedWorkloads, WorkloadLease, WorkloadManager},
};

use std::sync::{Mutex, MutexGuard};

// poisoned locks are recovered, the guarded state stays consistent per call
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
