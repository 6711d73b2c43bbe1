//! Worker substrate.
//!
//! A [`Worker`] performs one attempt of one unit. The pool owns timeouts,
//! retries and panic isolation; a worker only reports success or an error
//! message.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use tracing::debug;

use crate::core::task::TaskPayload;

/// Executes units on behalf of the pool.
///
/// `execute` must yield at `.await` points and never block the runtime
/// thread. On timeout or shutdown the pool aborts the attempt's task, which
/// only stops it at its next `.await`. A timed-out attempt that blocks
/// delays its own retry and stalls the runtime thread it occupies. Push
/// blocking work onto `tokio::task::spawn_blocking` or a child process.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run one attempt. `Err` carries a human-readable reason.
    async fn execute(&self, payload: TaskPayload) -> Result<Value, String>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Worker backed by an async closure.
pub struct FnWorker<F> {
    func: F,
}

impl<F, Fut> FnWorker<F>
where
    F: Fn(TaskPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(TaskPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    async fn execute(&self, payload: TaskPayload) -> Result<Value, String> {
        (self.func)(payload).await
    }
}

/// Runs a shell command per unit.
///
/// The payload JSON is written to stdin and the unit name, wave index and
/// run id are exported as `WAVEGEN_UNIT`, `WAVEGEN_WAVE` and
/// `WAVEGEN_RUN_ID`. Trimmed stdout becomes the output: JSON when it parses,
/// a plain string otherwise.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
}

impl CommandWorker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn execute(&self, payload: TaskPayload) -> Result<Value, String> {
        debug!(unit = %payload.unit.name, command = %self.command, "CommandWorker::execute");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("WAVEGEN_UNIT", &payload.unit.name)
            .env("WAVEGEN_WAVE", payload.wave.to_string())
            .env("WAVEGEN_RUN_ID", payload.context.run_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out attempt drops this future; the process must go with it
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn command: {}", e))?;

        // Feed stdin while draining stdout and stderr, or a command that
        // echoes more than a pipe buffer blocks on both ends
        let stdin = child.stdin.take();
        let input = payload.to_json().to_string();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading stdin
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| format!("failed to wait for command: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(if stderr.is_empty() {
                format!("command exited with {}", code)
            } else {
                format!("command exited with {}: {}", code, stderr)
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
    }
}
