//! Operation timing.
//!
//! Named operations are timed with an [`OperationTimer`] and aggregated per
//! name. Reporting never fails and never blocks a run.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct OperationStats {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl OperationStats {
    fn first(elapsed: Duration) -> Self {
        Self {
            count: 1,
            total: elapsed,
            min: elapsed,
            max: elapsed,
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
    }
}

/// Aggregated timings for one operation name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub name: String,
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Sorted by name.
    pub operations: Vec<OperationSummary>,
}

impl PerformanceReport {
    pub fn get(&self, name: &str) -> Option<&OperationSummary> {
        self.operations.iter().find(|op| op.name == name)
    }
}

/// Collects timings of named operations. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMonitor {
    records: Arc<Mutex<HashMap<String, OperationStats>>>,
    profile_mode: bool,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every recorded timing at debug level.
    pub fn with_profile_mode(mut self, enabled: bool) -> Self {
        self.profile_mode = enabled;
        self
    }

    pub fn start_operation(&self, name: impl Into<String>) -> OperationTimer {
        OperationTimer {
            monitor: self.clone(),
            name: name.into(),
            started: Instant::now(),
            recorded: false,
        }
    }

    fn record(&self, name: &str, elapsed: Duration) {
        let mut records = lock(&self.records);
        match records.get_mut(name) {
            Some(stats) => stats.record(elapsed),
            None => {
                records.insert(name.to_string(), OperationStats::first(elapsed));
            }
        }
        if self.profile_mode {
            debug!(operation = name, elapsed_ms = millis(elapsed), "operation timed");
        }
    }

    pub fn report(&self) -> PerformanceReport {
        let records = lock(&self.records);
        let mut operations: Vec<OperationSummary> = records
            .iter()
            .map(|(name, stats)| OperationSummary {
                name: name.clone(),
                count: stats.count,
                total_ms: millis(stats.total),
                min_ms: millis(stats.min),
                max_ms: millis(stats.max),
                mean_ms: millis(stats.total) / stats.count as f64,
            })
            .collect();
        operations.sort_by(|a, b| a.name.cmp(&b.name));
        PerformanceReport { operations }
    }

    pub fn reset(&self) {
        lock(&self.records).clear();
    }
}

/// Running timer for one operation. Records on [`stop`](Self::stop) or drop.
pub struct OperationTimer {
    monitor: PerformanceMonitor,
    name: String,
    started: Instant,
    recorded: bool,
}

impl OperationTimer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record the elapsed time and return it.
    pub fn stop(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        self.monitor.record(&self.name, elapsed);
        self.recorded = true;
        elapsed
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.recorded {
            self.monitor.record(&self.name, self.started.elapsed());
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
