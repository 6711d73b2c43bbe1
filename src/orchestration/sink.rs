//! Output sinks.
//!
//! The orchestrator hands each wave's successful results to an
//! [`OutputSink`] exactly once. Sinks own persistence; the engine only
//! counts what went through.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::core::task::ProcessingResult;
use crate::error::{Error, Result};

/// Counters reported by [`OutputSink::output_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    pub batches: u64,
    pub results: u64,
    pub bytes_written: u64,
}

#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Persist one wave's successful results.
    async fn handle_results(&self, results: &[ProcessingResult]) -> Result<()>;

    /// Whether a result is acceptable. Rejected results become task failures.
    fn validate_output(&self, _result: &ProcessingResult) -> bool {
        true
    }

    fn output_stats(&self) -> OutputStats;

    async fn cleanup(&self) -> Result<()>;
}

/// Keeps every result in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<ProcessingResult>>,
    stats: Mutex<OutputStats>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in arrival order.
    pub fn results(&self) -> Vec<ProcessingResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn handle_results(&self, results: &[ProcessingResult]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Sink("memory sink already cleaned up".to_string()));
        }
        let bytes: u64 = results
            .iter()
            .map(|r| r.output.to_string().len() as u64)
            .sum();
        {
            let mut stored = self.results.lock().unwrap_or_else(|p| p.into_inner());
            stored.extend_from_slice(results);
        }
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.batches += 1;
        stats.results += results.len() as u64;
        stats.bytes_written += bytes;
        Ok(())
    }

    fn output_stats(&self) -> OutputStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn cleanup(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Writes `<dir>/<unit>.json` for each result.
#[derive(Debug)]
pub struct JsonDirSink {
    dir: PathBuf,
    stats: Mutex<OutputStats>,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stats: Mutex::new(OutputStats::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, unit: &str) -> PathBuf {
        self.dir.join(format!("{}.json", unit))
    }
}

#[async_trait]
impl OutputSink for JsonDirSink {
    async fn handle_results(&self, results: &[ProcessingResult]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut written = 0u64;
        for result in results {
            let body = serde_json::to_vec_pretty(result)?;
            let path = self.path_for(&result.unit);
            tokio::fs::write(&path, &body)
                .await
                .map_err(|e| Error::Sink(format!("{}: {}", path.display(), e)))?;
            written += body.len() as u64;
        }
        debug!(dir = %self.dir.display(), results = results.len(), bytes = written, "batch written");

        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.batches += 1;
        stats.results += results.len() as u64;
        stats.bytes_written += written;
        Ok(())
    }

    /// Null output means the worker produced nothing worth writing.
    fn validate_output(&self, result: &ProcessingResult) -> bool {
        !result.output.is_null()
    }

    fn output_stats(&self) -> OutputStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
