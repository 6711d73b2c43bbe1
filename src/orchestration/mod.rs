//! Orchestration layer.
//!
//! The worker substrate, the bounded pool that runs it, output sinks and the
//! orchestrator that ties them to validation, wave building and memory
//! management.

mod orchestrator;
mod pool;
mod sink;
mod worker;

pub use orchestrator::{
    OrchestratorBuilder, OrchestratorConfig, OrchestratorStats, ProcessingOptions,
    ProcessingOrchestrator, ProcessingSummary, RunState,
};
pub use pool::{default_pool_size, PoolEvent, PoolStats, WorkerPool, MAX_POOL_SIZE};
pub use sink::{JsonDirSink, MemorySink, OutputSink, OutputStats};
pub use worker::{CommandWorker, FnWorker, Worker};
