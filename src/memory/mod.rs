//! Process memory tracking and pressure relief.

pub mod monitor;
pub mod probe;

pub use monitor::{
    CleanupReport, MemoryEvent, MemoryMonitor, MemorySnapshot, MemoryStats, MemoryThresholds,
    PressureLevel, SystemInfo, ThresholdUpdate,
};
pub use probe::{Collector, MemoryProbe, MemoryUsage, Reclaimable, SystemProbe};
