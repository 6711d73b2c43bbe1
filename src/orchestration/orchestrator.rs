//! Processing orchestrator.
//!
//! Drives a run end to end: validate, build waves, execute each wave on the
//! worker pool, hand successes to the sink and relieve memory pressure
//! before the next wave starts. A wave is a hard barrier; nothing from wave
//! `k + 1` is dispatched until every task of wave `k` has an outcome.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_MAX_MEMORY_USAGE, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS};
use crate::core::task::{ProcessingResult, RunContext, Task, TaskFailure, WorkerResult};
use crate::core::unit::Unit;
use crate::core::waves::{build_waves, Wave};
use crate::error::{Result, TaskError};
use crate::memory::{MemoryMonitor, MemoryUsage, PressureLevel};
use crate::orchestration::pool::{PoolEvent, WorkerPool};
use crate::orchestration::sink::{MemorySink, OutputSink};
use crate::orchestration::worker::Worker;
use crate::perf::PerformanceMonitor;
use crate::validation::{validate_templates_before_processing, DefaultValidator, Validator};

/// Settings fixed for the orchestrator's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub timeout: Duration,
    pub retries: u32,
    /// Health check fails above this many bytes.
    pub max_memory_usage: u64,
    pub gc_hints: bool,
    pub profile_mode: bool,
    /// Pool size override; `None` uses the default size.
    pub max_workers: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            max_memory_usage: DEFAULT_MAX_MEMORY_USAGE,
            gc_hints: true,
            profile_mode: false,
            max_workers: None,
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            max_memory_usage: config.max_memory_usage,
            gc_hints: config.gc_hints,
            profile_mode: config.profile_mode,
            max_workers: config.max_workers,
        }
    }
}

/// Per-run overrides. Unset fields fall back to [`OrchestratorConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

/// Where the orchestrator is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "wave", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Validating,
    Scheduling(usize),
    HandlingOutput(usize),
    MemoryManaging(usize),
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Validating => write!(f, "validating"),
            RunState::Scheduling(wave) => write!(f, "scheduling wave {}", wave),
            RunState::HandlingOutput(wave) => write!(f, "handling output of wave {}", wave),
            RunState::MemoryManaging(wave) => write!(f, "managing memory after wave {}", wave),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSummary {
    pub run_id: Uuid,
    pub results: Vec<ProcessingResult>,
    pub failures: Vec<TaskFailure>,
    /// Number of waves executed.
    pub waves: usize,
    pub duration_ms: u64,
}

impl ProcessingSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn result_for(&self, unit: &str) -> Option<&ProcessingResult> {
        self.results.iter().find(|r| r.unit == unit)
    }
}

impl fmt::Display for ProcessingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            write!(f, "completed successfully")
        } else {
            write!(f, "completed with {} errors", self.failures.len())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub max_workers: usize,
    pub pool_size: usize,
    pub available_workers: usize,
    pub memory_usage: MemoryUsage,
}

/// Assembles a [`ProcessingOrchestrator`]. Only the worker is required.
pub struct OrchestratorBuilder {
    worker: Arc<dyn Worker>,
    validator: Option<Box<dyn Validator>>,
    sink: Option<Arc<dyn OutputSink>>,
    monitor: Option<MemoryMonitor>,
    config: OrchestratorConfig,
    pool_events: Option<mpsc::Sender<PoolEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self {
            worker,
            validator: None,
            sink: None,
            monitor: None,
            config: OrchestratorConfig::default(),
            pool_events: None,
        }
    }

    pub fn validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn monitor(mut self, monitor: MemoryMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool_events(mut self, tx: mpsc::Sender<PoolEvent>) -> Self {
        self.pool_events = Some(tx);
        self
    }

    pub fn build(self) -> ProcessingOrchestrator {
        let mut pool = match self.config.max_workers {
            Some(size) => WorkerPool::with_size(self.worker, size),
            None => WorkerPool::new(self.worker),
        };
        if let Some(tx) = self.pool_events {
            pool = pool.with_events(tx);
        }

        ProcessingOrchestrator {
            pool,
            validator: self
                .validator
                .unwrap_or_else(|| Box::new(DefaultValidator::new())),
            sink: self.sink.unwrap_or_else(|| Arc::new(MemorySink::new())),
            monitor: self.monitor.unwrap_or_default(),
            perf: PerformanceMonitor::new().with_profile_mode(self.config.profile_mode),
            config: self.config,
            state: RunState::Idle,
        }
    }
}

pub struct ProcessingOrchestrator {
    pool: WorkerPool,
    validator: Box<dyn Validator>,
    sink: Arc<dyn OutputSink>,
    monitor: MemoryMonitor,
    perf: PerformanceMonitor,
    config: OrchestratorConfig,
    state: RunState,
}

impl ProcessingOrchestrator {
    pub fn builder(worker: Arc<dyn Worker>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(worker)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Close out a finished run and return to [`RunState::Idle`].
    ///
    /// A no-op when already idle. Runs call this on entry, so `Done` and
    /// `Failed` only persist between runs.
    pub fn reset(&mut self) {
        if self.state != RunState::Idle {
            debug!(from = %self.state, "orchestrator idle");
            self.state = RunState::Idle;
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &MemoryMonitor {
        &self.monitor
    }

    pub fn perf(&self) -> &PerformanceMonitor {
        &self.perf
    }

    pub fn sink(&self) -> &Arc<dyn OutputSink> {
        &self.sink
    }

    /// Run every unit, wave by wave.
    ///
    /// Task failures are collected in the summary and never abort the run.
    /// Validation errors, pool failures and sink errors do; memory
    /// monitoring is stopped on every exit path.
    pub async fn process_templates(
        &mut self,
        units: &[Unit],
        context: RunContext,
        options: ProcessingOptions,
    ) -> Result<ProcessingSummary> {
        self.reset();
        let timer = self.perf.start_operation("process_templates");
        self.monitor.start_monitoring();

        let outcome = self.run_pipeline(units, Arc::new(context), options).await;

        self.monitor.stop_monitoring();
        timer.stop();

        match &outcome {
            Ok(summary) => {
                self.state = RunState::Done;
                info!(
                    run = %summary.run_id,
                    results = summary.results.len(),
                    failures = summary.failures.len(),
                    duration_ms = summary.duration_ms,
                    "processing {}",
                    summary
                );
            }
            Err(e) => {
                self.state = RunState::Failed;
                error!(error = %e, "processing failed");
            }
        }
        outcome
    }

    async fn run_pipeline(
        &mut self,
        units: &[Unit],
        context: Arc<RunContext>,
        options: ProcessingOptions,
    ) -> Result<ProcessingSummary> {
        let started = Instant::now();

        self.state = RunState::Validating;
        {
            let _timer = self.perf.start_operation("validate");
            validate_templates_before_processing(self.validator.as_ref(), units)?;
        }

        let waves = {
            let _timer = self.perf.start_operation("build_waves");
            build_waves(units)
        };

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let retries = options.retries.unwrap_or(self.config.retries);
        info!(
            run = %context.short_id(),
            units = units.len(),
            waves = waves.len(),
            timeout_ms = timeout.as_millis() as u64,
            retries,
            "processing started"
        );

        let mut summary = ProcessingSummary {
            run_id: context.run_id,
            results: Vec::with_capacity(units.len()),
            failures: Vec::new(),
            waves: waves.len(),
            duration_ms: 0,
        };

        for wave in &waves {
            self.run_wave(wave, &context, timeout, retries, &mut summary)
                .await?;
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    async fn run_wave(
        &mut self,
        wave: &Wave,
        context: &Arc<RunContext>,
        timeout: Duration,
        retries: u32,
        summary: &mut ProcessingSummary,
    ) -> Result<()> {
        self.state = RunState::Scheduling(wave.index);
        let tasks: Vec<Task> = wave
            .units
            .iter()
            .map(|unit| Task::from_unit(unit, context, wave.index, timeout, retries))
            .collect();
        debug!(wave = wave.index, tasks = tasks.len(), "dispatching wave");

        let worker_results = {
            let _timer = self.perf.start_operation("execute_wave");
            self.pool.execute_tasks(tasks).await?
        };

        self.state = RunState::HandlingOutput(wave.index);
        let (successes, failures) = self.partition(wave.index, worker_results);
        if !successes.is_empty() {
            let _timer = self.perf.start_operation("handle_results");
            self.sink.handle_results(&successes).await?;
        }
        info!(
            wave = wave.index,
            succeeded = successes.len(),
            failed = failures.len(),
            "wave complete"
        );
        summary.results.extend(successes);
        summary.failures.extend(failures);

        self.state = RunState::MemoryManaging(wave.index);
        self.manage_memory(wave.index);
        Ok(())
    }

    /// Split pool output into sink-bound results and reported failures.
    fn partition(
        &self,
        wave: usize,
        worker_results: Vec<WorkerResult>,
    ) -> (Vec<ProcessingResult>, Vec<TaskFailure>) {
        let mut successes = Vec::new();
        let mut failures = Vec::new();

        for worker_result in worker_results {
            let WorkerResult {
                id,
                attempts,
                result,
            } = worker_result;

            let error = match result {
                Ok(output) => {
                    let processed = ProcessingResult {
                        unit: id,
                        wave,
                        attempts,
                        output,
                        completed_at: Utc::now(),
                    };
                    if self.sink.validate_output(&processed) {
                        successes.push(processed);
                        continue;
                    }
                    failures.push(TaskFailure {
                        unit: processed.unit,
                        wave,
                        attempts,
                        error: TaskError::InvalidOutput,
                    });
                    continue;
                }
                Err(error) => error,
            };

            warn!(unit = %id, wave, attempts, %error, "task failed");
            failures.push(TaskFailure {
                unit: id,
                wave,
                attempts,
                error,
            });
        }

        (successes, failures)
    }

    fn manage_memory(&self, wave: usize) {
        let _timer = self.perf.start_operation("manage_memory");
        match self.monitor.pressure_level() {
            PressureLevel::Critical => {
                warn!(wave, "critical memory pressure after wave");
                self.monitor.emergency_cleanup();
            }
            level if level >= PressureLevel::Medium && self.config.gc_hints => {
                debug!(wave, %level, "memory pressure, forcing collection");
                self.monitor.force_gc();
            }
            level => debug!(wave, %level, "memory ok"),
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        let pool = self.pool.stats();
        OrchestratorStats {
            max_workers: pool.max_workers,
            pool_size: pool.pool_size,
            available_workers: pool.available_workers,
            memory_usage: self.monitor.memory_usage(),
        }
    }

    pub fn health_check(&self) -> bool {
        let current = self.monitor.memory_usage().current();
        self.pool.health_check()
            && self.monitor.thresholds().level_for(current) != PressureLevel::Critical
            && current <= self.config.max_memory_usage
    }

    /// Destroy the pool, clean up the sink and stop monitoring.
    pub async fn cleanup(&self) -> Result<()> {
        self.pool.destroy();
        let outcome = self.sink.cleanup().await;
        self.monitor.stop_monitoring();
        info!("orchestrator cleaned up");
        outcome
    }
}

impl fmt::Debug for ProcessingOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingOrchestrator")
            .field("state", &self.state)
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}
