//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building units and manifests
//! - Recording workers
//! - A scripted memory probe

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;

use wavegen::core::{TaskPayload, Unit};
use wavegen::memory::{MemoryMonitor, MemoryProbe, MemoryUsage};
use wavegen::orchestration::{FnWorker, Worker};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Shorthand for a unit with dependencies and priority.
pub fn unit(name: &str, deps: &[&str], priority: i64) -> Unit {
    Unit::new(name)
        .with_dependencies(deps.iter().copied())
        .with_priority(priority)
}

/// A layered set: `width` roots, then `depth - 1` layers each depending on
/// every unit of the layer before.
pub fn layered_units(depth: usize, width: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    for layer in 0..depth {
        for i in 0..width {
            let deps: Vec<String> = if layer == 0 {
                Vec::new()
            } else {
                (0..width).map(|j| format!("l{}-{}", layer - 1, j)).collect()
            };
            units.push(Unit::new(&format!("l{}-{}", layer, i)).with_dependencies(deps));
        }
    }
    units
}

pub const SAMPLE_MANIFEST: &str = r#"
[[unit]]
name = "readme"
dependencies = ["api", "models"]

[[unit]]
name = "schema"
priority = 10
content = "tables"

[[unit]]
name = "models"
dependencies = ["schema"]

[[unit]]
name = "api"
dependencies = ["models"]
priority = 3
"#;

/// Completion log shared between a worker and the test.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<(String, usize)>>>,
}

impl ExecutionLog {
    pub fn record(&self, unit: &str, wave: usize) {
        self.entries.lock().unwrap().push((unit.to_string(), wave));
    }

    pub fn entries(&self) -> Vec<(String, usize)> {
        self.entries.lock().unwrap().clone()
    }

    /// Position of a unit in completion order.
    pub fn position(&self, unit: &str) -> Option<usize> {
        self.entries().iter().position(|(name, _)| name == unit)
    }
}

/// Worker that logs each completion and echoes the unit name and wave.
pub fn recording_worker(log: ExecutionLog) -> Arc<dyn Worker> {
    Arc::new(FnWorker::new(move |payload: TaskPayload| {
        let log = log.clone();
        async move {
            log.record(&payload.unit.name, payload.wave);
            Ok(json!({"unit": payload.unit.name, "wave": payload.wave}))
        }
    }))
}

/// Probe replaying a script of RSS readings, repeating the last one.
pub struct ScriptedProbe {
    total: u64,
    readings: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
}

impl ScriptedProbe {
    pub fn new(total: u64, readings: &[u64]) -> Self {
        Self {
            total,
            readings: Mutex::new(readings.iter().copied().collect()),
            last: Mutex::new(readings.first().copied().unwrap_or(0)),
        }
    }
}

impl MemoryProbe for ScriptedProbe {
    fn usage(&self) -> MemoryUsage {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.readings.lock().unwrap().pop_front() {
            *last = next;
        }
        MemoryUsage::new(*last)
    }

    fn total_memory(&self) -> u64 {
        self.total
    }
}

/// Monitor on an 8 GiB machine with steady usage.
pub fn steady_monitor(rss: u64) -> MemoryMonitor {
    MemoryMonitor::with_probe(Box::new(ScriptedProbe::new(8 * GIB, &[rss])))
}
