//! Core domain models for wave scheduling.
//!
//! Units and their manifest, the per-run task records, the dependency graph
//! and the wave partitioning built on top of it.

pub mod graph;
pub mod task;
pub mod unit;
pub mod waves;

pub use graph::UnitGraph;
pub use task::{ProcessingResult, RunContext, Task, TaskFailure, TaskPayload, WorkerResult};
pub use unit::{Manifest, Unit};
pub use waves::{build_waves, plan_waves, Wave, WavePlan};
