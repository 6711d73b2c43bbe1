//! Memory monitor.
//!
//! Tracks process memory against configured thresholds, classifies pressure
//! and relieves it on request. The orchestrator owns one monitor and calls
//! into it between waves; nothing else mutates its statistics. Events go
//! out through typed channels handed out by [`MemoryMonitor::subscribe`].

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::{Config, DEFAULT_SAMPLE_INTERVAL_MS};
use crate::memory::probe::{Collector, MemoryProbe, MemoryUsage, Reclaimable, SystemProbe};

pub const DEFAULT_WARNING_PCT: f64 = 0.70;
pub const DEFAULT_CRITICAL_PCT: f64 = 0.85;
pub const DEFAULT_CLEANUP_PCT: f64 = 0.60;

/// Coarse classification of memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PressureLevel::Low => write!(f, "low"),
            PressureLevel::Medium => write!(f, "medium"),
            PressureLevel::High => write!(f, "high"),
            PressureLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Byte thresholds for pressure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    pub warning: u64,
    pub critical: u64,
    /// Target level after a cleanup.
    pub cleanup: u64,
}

impl MemoryThresholds {
    /// Defaults derived from total system memory: 70% / 85% / 60%.
    pub fn from_total(total: u64) -> Self {
        Self::from_fractions(total, DEFAULT_WARNING_PCT, DEFAULT_CRITICAL_PCT, DEFAULT_CLEANUP_PCT)
    }

    pub fn from_fractions(total: u64, warning: f64, critical: f64, cleanup: f64) -> Self {
        let of_total = |fraction: f64| (total as f64 * fraction.clamp(0.0, 1.0)) as u64;
        Self {
            warning: of_total(warning),
            critical: of_total(critical),
            cleanup: of_total(cleanup),
        }
    }

    /// Below warning is low, at or above critical is critical; the band in
    /// between splits into medium and high at its midpoint.
    pub fn level_for(&self, current: u64) -> PressureLevel {
        if current >= self.critical {
            PressureLevel::Critical
        } else if current >= self.warning {
            let midpoint = self.warning + self.critical.saturating_sub(self.warning) / 2;
            if current >= midpoint {
                PressureLevel::High
            } else {
                PressureLevel::Medium
            }
        } else {
            PressureLevel::Low
        }
    }

    pub fn apply(&mut self, update: ThresholdUpdate) {
        if let Some(warning) = update.warning {
            self.warning = warning;
        }
        if let Some(critical) = update.critical {
            self.critical = critical;
        }
        if let Some(cleanup) = update.cleanup {
            self.cleanup = cleanup;
        }
    }
}

/// Partial threshold override; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdUpdate {
    pub warning: Option<u64>,
    pub critical: Option<u64>,
    pub cleanup: Option<u64>,
}

/// Running statistics, reset only by [`MemoryMonitor::reset_stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub current: u64,
    pub peak: u64,
    pub thresholds: MemoryThresholds,
    pub gc_count: u64,
    pub last_gc: Option<DateTime<Utc>>,
}

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryEvent {
    /// A background sample found usage at or above the warning threshold.
    Pressure {
        level: PressureLevel,
        usage: MemoryUsage,
    },
    /// A forced collection ran.
    Gc { before: u64, after: u64, freed: u64 },
    /// Emergency cleanup completed.
    EmergencyCleanup {
        before: u64,
        after: u64,
        entries_released: usize,
    },
}

/// What [`MemoryMonitor::emergency_cleanup`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub gc_ran: bool,
    pub before: u64,
    pub after: u64,
    pub entries_released: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub total_memory: u64,
    pub available_memory: Option<u64>,
    pub cpus: usize,
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcInfo {
    pub count: u64,
    pub last: Option<DateTime<Utc>>,
    pub collector_installed: bool,
}

/// Point-in-time diagnostic bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySnapshot {
    pub timestamp: DateTime<Utc>,
    pub usage: MemoryUsage,
    pub peak: u64,
    pub thresholds: MemoryThresholds,
    pub gc: GcInfo,
    pub system: SystemInfo,
    pub pressure_level: PressureLevel,
    pub recommendations: Vec<String>,
}

struct Shared {
    probe: Box<dyn MemoryProbe>,
    collector: Option<Box<dyn Collector>>,
    stats: Mutex<MemoryStats>,
    subscribers: Mutex<Vec<Sender<MemoryEvent>>>,
    caches: Mutex<Vec<Arc<dyn Reclaimable>>>,
}

impl Shared {
    /// Sample the probe and fold the figure into current/peak.
    fn sample(&self) -> MemoryUsage {
        let usage = self.probe.usage();
        let mut stats = lock(&self.stats);
        stats.current = usage.current();
        stats.peak = stats.peak.max(stats.current);
        usage
    }

    fn emit(&self, event: MemoryEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Sampler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Process memory monitor with an explicit start/stop lifecycle.
pub struct MemoryMonitor {
    shared: Arc<Shared>,
    sampler: Mutex<Option<Sampler>>,
    interval: Duration,
}

impl MemoryMonitor {
    /// Monitor backed by the OS probe with default thresholds and no collector.
    pub fn new() -> Self {
        Self::with_probe(Box::new(SystemProbe::new()))
    }

    pub fn with_probe(probe: Box<dyn MemoryProbe>) -> Self {
        let thresholds = MemoryThresholds::from_total(probe.total_memory());
        let stats = MemoryStats {
            current: 0,
            peak: 0,
            thresholds,
            gc_count: 0,
            last_gc: None,
        };
        Self {
            shared: Arc::new(Shared {
                probe,
                collector: None,
                stats: Mutex::new(stats),
                subscribers: Mutex::new(Vec::new()),
                caches: Mutex::new(Vec::new()),
            }),
            sampler: Mutex::new(None),
            interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
        }
    }

    /// Monitor configured from the user config: sampler interval and any
    /// threshold percentages it overrides.
    pub fn from_config(config: &Config) -> Self {
        let monitor = Self::new().with_sample_interval(config.sample_interval());
        let total = monitor.shared.probe.total_memory();
        let defaults = MemoryThresholds::from_fractions(
            total,
            config.warning_pct.unwrap_or(DEFAULT_WARNING_PCT),
            config.critical_pct.unwrap_or(DEFAULT_CRITICAL_PCT),
            config.cleanup_pct.unwrap_or(DEFAULT_CLEANUP_PCT),
        );
        lock(&monitor.shared.stats).thresholds = defaults;
        monitor
    }

    /// Install a forced-collection capability.
    ///
    /// Must be called before the monitor is shared or started.
    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.collector = Some(collector),
            None => warn!("collector ignored: monitor already started"),
        }
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<MemoryEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Register a cache to be cleared by emergency cleanup.
    pub fn register_cache(&self, cache: Arc<dyn Reclaimable>) {
        debug!(cache = cache.name(), "cache registered with memory monitor");
        lock(&self.shared.caches).push(cache);
    }

    /// Start the background sampler. A second call while running is a no-op.
    pub fn start_monitoring(&self) {
        let mut sampler = lock(&self.sampler);
        if sampler.is_some() {
            debug!("memory monitoring already running");
            return;
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let handle = std::thread::spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let usage = shared.sample();
                        let level = lock(&shared.stats).thresholds.level_for(usage.current());
                        trace!(rss = usage.rss, %level, "memory sample");
                        if level >= PressureLevel::Medium {
                            shared.emit(MemoryEvent::Pressure { level, usage });
                        }
                    }
                }
            }
        });

        *sampler = Some(Sampler { stop_tx, handle });
        info!(interval_ms = interval.as_millis() as u64, "memory monitoring started");
    }

    /// Stop the background sampler. Safe to call when not running.
    pub fn stop_monitoring(&self) {
        let Some(sampler) = lock(&self.sampler).take() else {
            return;
        };
        let _ = sampler.stop_tx.send(());
        if sampler.handle.join().is_err() {
            warn!("memory sampler thread panicked");
        }
        info!("memory monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.sampler).is_some()
    }

    /// Sample current usage, updating current and peak.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.shared.sample()
    }

    pub fn stats(&self) -> MemoryStats {
        lock(&self.shared.stats).clone()
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        lock(&self.shared.stats).thresholds
    }

    pub fn set_thresholds(&self, update: ThresholdUpdate) {
        let mut stats = lock(&self.shared.stats);
        stats.thresholds.apply(update);
        debug!(thresholds = ?stats.thresholds, "memory thresholds updated");
    }

    /// Whether current usage is at or above the warning threshold.
    pub fn is_memory_pressure(&self) -> bool {
        let current = self.memory_usage().current();
        current >= self.thresholds().warning
    }

    pub fn pressure_level(&self) -> PressureLevel {
        let current = self.memory_usage().current();
        self.thresholds().level_for(current)
    }

    /// Run a forced collection if a collector is installed.
    ///
    /// Returns true only when a collection actually ran.
    pub fn force_gc(&self) -> bool {
        let Some(collector) = self.shared.collector.as_ref() else {
            debug!("force_gc: no collector installed");
            return false;
        };

        let before = self.memory_usage().current();
        if !collector.collect() {
            debug!("force_gc: collector declined");
            return false;
        }
        let after = self.memory_usage().current();
        let freed = before.saturating_sub(after);

        {
            let mut stats = lock(&self.shared.stats);
            stats.gc_count += 1;
            stats.last_gc = Some(Utc::now());
        }

        debug!(before, after, freed, "forced collection");
        self.shared.emit(MemoryEvent::Gc {
            before,
            after,
            freed,
        });
        true
    }

    /// Force a collection and release every registered cache.
    pub fn emergency_cleanup(&self) -> CleanupReport {
        let before = self.memory_usage().current();
        warn!(current = before, "emergency memory cleanup");

        let gc_ran = self.force_gc();
        let caches: Vec<Arc<dyn Reclaimable>> = lock(&self.shared.caches).clone();
        let entries_released = caches.iter().map(|cache| cache.reclaim()).sum();

        let after = self.memory_usage().current();
        self.shared.emit(MemoryEvent::EmergencyCleanup {
            before,
            after,
            entries_released,
        });
        info!(before, after, entries_released, "emergency cleanup complete");

        CleanupReport {
            gc_ran,
            before,
            after,
            entries_released,
        }
    }

    /// Reset peak to the current figure and clear collection counters.
    pub fn reset_stats(&self) {
        let mut stats = lock(&self.shared.stats);
        stats.peak = stats.current;
        stats.gc_count = 0;
        stats.last_gc = None;
    }

    /// Heuristic advice for the current state.
    pub fn recommendations(&self) -> Vec<String> {
        let usage = self.memory_usage();
        let stats = self.stats();
        let level = stats.thresholds.level_for(usage.current());
        let pressure = level >= PressureLevel::Medium;
        let mut advice = Vec::new();

        match level {
            PressureLevel::Critical => advice.push(
                "Memory usage is critical: process templates in smaller batches and stream \
                 outputs to disk instead of buffering them"
                    .to_string(),
            ),
            PressureLevel::High => advice.push(
                "Memory usage is high: consider streaming large template outputs".to_string(),
            ),
            PressureLevel::Medium => advice.push(
                "Memory usage is above the warning threshold: keep an eye on output sizes"
                    .to_string(),
            ),
            PressureLevel::Low => {}
        }

        if stats.peak >= stats.thresholds.critical {
            advice.push(
                "Peak usage reached the critical threshold: reduce the worker pool size"
                    .to_string(),
            );
        }

        if pressure {
            if self.shared.collector.is_none() {
                advice.push(
                    "No collector installed: register a Collector or reclaimable caches so \
                     pressure can be relieved"
                        .to_string(),
                );
            } else if stats.gc_count == 0 {
                advice.push("Enable gc_hints to collect between waves".to_string());
            }

            let caches = lock(&self.shared.caches).len();
            if caches > 0 {
                advice.push(format!(
                    "{} result cache(s) will be released by emergency cleanup",
                    caches
                ));
            }
        }

        if advice.is_empty() {
            advice.push("Memory usage is healthy".to_string());
        }
        advice
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            total_memory: self.shared.probe.total_memory(),
            available_memory: self.shared.probe.available_memory(),
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn create_snapshot(&self) -> MemorySnapshot {
        let usage = self.memory_usage();
        let stats = self.stats();
        MemorySnapshot {
            timestamp: Utc::now(),
            usage,
            peak: stats.peak,
            thresholds: stats.thresholds,
            gc: GcInfo {
                count: stats.gc_count,
                last: stats.last_gc,
                collector_installed: self.shared.collector.is_some(),
            },
            system: self.system_info(),
            pressure_level: stats.thresholds.level_for(usage.current()),
            recommendations: self.recommendations(),
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("monitoring", &self.is_monitoring())
            .field("interval", &self.interval)
            .field("collector", &self.shared.collector.is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
