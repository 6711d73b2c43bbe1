//! Memory sampling and reclamation capabilities.
//!
//! The monitor never reads the OS directly; it goes through a
//! [`MemoryProbe`]. Forced collection and cache reclamation are optional
//! capabilities plugged in through [`Collector`] and [`Reclaimable`].

use serde::{Deserialize, Serialize};

/// Fallback when total system memory cannot be read.
pub const FALLBACK_TOTAL_MEMORY: u64 = 8 * 1024 * 1024 * 1024;

/// Process memory at one instant, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Resident set size.
    pub rss: u64,
    /// Virtual address space size.
    pub virtual_bytes: u64,
}

impl MemoryUsage {
    pub fn new(rss: u64) -> Self {
        Self {
            rss,
            virtual_bytes: rss,
        }
    }

    /// The figure compared against thresholds.
    pub fn current(&self) -> u64 {
        self.rss
    }
}

/// Source of memory figures.
pub trait MemoryProbe: Send + Sync {
    fn usage(&self) -> MemoryUsage;

    fn total_memory(&self) -> u64;

    fn available_memory(&self) -> Option<u64> {
        None
    }
}

/// A forced-collection capability.
pub trait Collector: Send + Sync {
    /// Run a collection. Returns whether one actually ran.
    fn collect(&self) -> bool;
}

/// A cache the monitor may clear under critical pressure.
pub trait Reclaimable: Send + Sync {
    fn name(&self) -> &str;

    /// Drop everything held. Returns the number of entries released.
    fn reclaim(&self) -> usize;
}

/// Reads the current process and host figures from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl MemoryProbe for SystemProbe {
    fn usage(&self) -> MemoryUsage {
        let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
        MemoryUsage {
            rss: kib_field(&status, "VmRSS:").unwrap_or(0),
            virtual_bytes: kib_field(&status, "VmSize:").unwrap_or(0),
        }
    }

    fn total_memory(&self) -> u64 {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|info| kib_field(&info, "MemTotal:"))
            .unwrap_or(FALLBACK_TOTAL_MEMORY)
    }

    fn available_memory(&self) -> Option<u64> {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|info| kib_field(&info, "MemAvailable:"))
    }
}

#[cfg(not(target_os = "linux"))]
impl MemoryProbe for SystemProbe {
    fn usage(&self) -> MemoryUsage {
        MemoryUsage::default()
    }

    fn total_memory(&self) -> u64 {
        FALLBACK_TOTAL_MEMORY
    }
}

/// Parse a `Key:   1234 kB` line from a procfs file into bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn kib_field(source: &str, key: &str) -> Option<u64> {
    let line = source.lines().find(|line| line.starts_with(key))?;
    let kib: u64 = line[key.len()..].split_whitespace().next()?.parse().ok()?;
    Some(kib * 1024)
}
