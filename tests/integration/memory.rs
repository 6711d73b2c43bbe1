//! Memory monitor integration tests.
//!
//! These tests verify pressure classification, forced collection and
//! snapshots through the public API with a scripted probe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wavegen::config::Config;
use wavegen::memory::{
    Collector, MemoryEvent, MemoryMonitor, MemoryProbe, MemoryThresholds, PressureLevel,
    Reclaimable, SystemProbe, ThresholdUpdate,
};

use crate::fixtures::{steady_monitor, ScriptedProbe, GIB, MIB};

struct CountingCollector(Arc<AtomicUsize>);

impl Collector for CountingCollector {
    fn collect(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn gib(x: f64) -> u64 {
    (x * GIB as f64) as u64
}

/// Test: Pressure thresholds on an 8 GiB machine
/// Given default thresholds
/// When usage is 4.1, 6.0 and 7.0 GiB
/// Then levels are low, medium and critical
#[test]
fn test_pressure_thresholds_8_gib() {
    assert_eq!(steady_monitor(gib(4.1)).pressure_level(), PressureLevel::Low);
    assert_eq!(steady_monitor(gib(6.0)).pressure_level(), PressureLevel::Medium);
    assert_eq!(steady_monitor(gib(7.0)).pressure_level(), PressureLevel::Critical);

    assert!(!steady_monitor(gib(4.1)).is_memory_pressure());
    assert!(steady_monitor(gib(6.0)).is_memory_pressure());
}

/// Test: Forced collection reports what it freed
/// Given a collector and usage dropping from 200 MiB to 100 MiB
/// When force_gc runs
/// Then it returns true and a Gc event reports 100 MiB freed
#[test]
fn test_force_gc_freed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let monitor =
        MemoryMonitor::with_probe(Box::new(ScriptedProbe::new(8 * GIB, &[200 * MIB, 100 * MIB])))
            .with_collector(Box::new(CountingCollector(Arc::clone(&calls))));
    let events = monitor.subscribe();

    assert!(monitor.force_gc());
    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)).unwrap(),
        MemoryEvent::Gc {
            before: 200 * MIB,
            after: 100 * MIB,
            freed: 100 * MIB,
        }
    );
    assert_eq!(monitor.stats().gc_count, 1);
}

/// Test: No collector
/// Given a monitor without a collector
/// When force_gc runs
/// Then it returns false and does not fail
#[test]
fn test_force_gc_without_collector() {
    let monitor = steady_monitor(200 * MIB);
    assert!(!monitor.force_gc());
    assert!(monitor.stats().last_gc.is_none());
}

/// Test: Config thresholds
/// Given a config overriding the warning fraction
/// When a monitor is built from it
/// Then warning follows the override and the rest keep their defaults
#[test]
fn test_thresholds_from_config_fractions() {
    let config = Config {
        warning_pct: Some(0.5),
        ..Default::default()
    };
    let monitor = MemoryMonitor::from_config(&config);

    let total = SystemProbe::new().total_memory();
    let expected = MemoryThresholds::from_fractions(total, 0.5, 0.85, 0.60);
    assert_eq!(monitor.thresholds(), expected);
    assert_eq!(
        MemoryThresholds::from_fractions(8 * GIB, 0.5, 0.85, 0.60).warning,
        4 * GIB
    );
}

/// Test: Per-run threshold override
/// Given a lowered critical threshold
/// When usage sits above it
/// Then the level becomes critical and emergency cleanup releases caches
#[test]
fn test_threshold_override_and_emergency_cleanup() {
    struct Outputs(AtomicUsize);

    impl Reclaimable for Outputs {
        fn name(&self) -> &str {
            "outputs"
        }

        fn reclaim(&self) -> usize {
            self.0.swap(0, Ordering::SeqCst)
        }
    }

    let monitor = steady_monitor(GIB);
    assert_eq!(monitor.pressure_level(), PressureLevel::Low);

    monitor.set_thresholds(ThresholdUpdate {
        warning: Some(512 * MIB),
        critical: Some(768 * MIB),
        cleanup: None,
    });
    assert_eq!(monitor.pressure_level(), PressureLevel::Critical);

    let cache = Arc::new(Outputs(AtomicUsize::new(42)));
    monitor.register_cache(cache.clone());
    let report = monitor.emergency_cleanup();
    assert_eq!(report.entries_released, 42);
    assert!(!report.gc_ran);
}

/// Test: Background sampling
/// Given a fast sampler under high usage
/// When monitoring runs briefly
/// Then pressure events arrive and peak is tracked
#[test]
fn test_background_sampler_reports_pressure() {
    let monitor = MemoryMonitor::with_probe(Box::new(ScriptedProbe::new(
        8 * GIB,
        &[gib(6.6), gib(7.5)],
    )))
    .with_sample_interval(Duration::from_millis(5));
    let events = monitor.subscribe();

    monitor.start_monitoring();
    let first = events.recv_timeout(Duration::from_secs(2)).unwrap();
    let second = events.recv_timeout(Duration::from_secs(2)).unwrap();
    monitor.stop_monitoring();

    assert!(matches!(first, MemoryEvent::Pressure { level: PressureLevel::High, .. }));
    assert!(matches!(second, MemoryEvent::Pressure { level: PressureLevel::Critical, .. }));
    assert_eq!(monitor.stats().peak, gib(7.5));
}

/// Test: Snapshot for diagnostics
/// Given a monitor under medium pressure
/// When a snapshot is created and serialized
/// Then it carries usage, level, system info and advice
#[test]
fn test_snapshot_serializes() {
    let monitor = steady_monitor(gib(6.0));
    let snapshot = monitor.create_snapshot();
    let value = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(value["pressure_level"], "medium");
    assert_eq!(value["usage"]["rss"], gib(6.0));
    assert_eq!(value["system"]["total_memory"], 8 * GIB);
    assert!(value["system"]["cpus"].as_u64().unwrap() >= 1);
    assert!(!snapshot.recommendations.is_empty());
}
