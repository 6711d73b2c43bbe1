//! Per-run execution records derived from units.
//!
//! A [`Task`] wraps one unit for a single run. The worker pool turns each
//! task into a [`WorkerResult`]; the orchestrator turns successful results
//! into [`ProcessingResult`]s for the output sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::unit::Unit;
use crate::error::TaskError;

/// Read-only values shared by every task of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    /// Return first 8 characters of the run id for display.
    pub fn short_id(&self) -> String {
        self.run_id.to_string()[..8].to_string()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What a worker receives for one attempt.
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub unit: Unit,
    pub context: Arc<RunContext>,
    pub wave: usize,
}

impl TaskPayload {
    pub fn to_json(&self) -> Value {
        json!({
            "unit": self.unit,
            "wave": self.wave,
            "context": self.context.as_ref(),
        })
    }
}

/// One unit prepared for execution.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unit name; unique within a run.
    pub id: String,
    pub payload: TaskPayload,
    /// Time box for a single attempt.
    pub timeout: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub priority: i64,
}

impl Task {
    pub fn from_unit(
        unit: &Unit,
        context: &Arc<RunContext>,
        wave: usize,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            id: unit.name.clone(),
            payload: TaskPayload {
                unit: unit.clone(),
                context: Arc::clone(context),
                wave,
            },
            timeout,
            max_retries,
            priority: unit.priority,
        }
    }

    /// Upper bound on attempts: the first one plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Outcome of running a task to completion or exhaustion.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub id: String,
    /// Attempts actually dispatched.
    pub attempts: u32,
    pub result: std::result::Result<Value, TaskError>,
}

impl WorkerResult {
    pub fn success(id: &str, attempts: u32, value: Value) -> Self {
        Self {
            id: id.to_string(),
            attempts,
            result: Ok(value),
        }
    }

    pub fn failure(id: &str, attempts: u32, error: TaskError) -> Self {
        Self {
            id: id.to_string(),
            attempts,
            result: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A completed unit, handed to the output sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub unit: String,
    pub wave: usize,
    pub attempts: u32,
    pub output: Value,
    pub completed_at: DateTime<Utc>,
}

/// A unit that did not produce a result. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub unit: String,
    pub wave: usize,
    pub attempts: u32,
    pub error: TaskError,
}
