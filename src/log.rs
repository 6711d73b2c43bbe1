//! Structured logging for wavegen.
//!
//! Log levels:
//! - ERROR: Fatal run failures (validation, pool failure)
//! - WARN: Recoverable conditions (task failures, memory pressure, cycle breaks)
//! - INFO: Run and wave lifecycle
//! - DEBUG: Per-task dispatch, retries, timings in profile mode
//! - TRACE: Memory sampler ticks
//!
//! Debug mode can be enabled with `--debug` flag or `WAVEGEN_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when set.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Log levels accepted by [`init_with_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    pub fn as_tracing(&self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Whether `WAVEGEN_DEBUG` asks for debug logging.
pub fn env_debug() -> bool {
    std::env::var("WAVEGEN_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Initialize logging to ~/.wavegen/wavegen.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let level = if debug || env_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    init_with_level(level);
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_with_level(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wavegen={}", level.as_str())));

    let file = dirs::home_dir()
        .map(|h| h.join(".wavegen"))
        .and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            let path = dir.join("wavegen.log");
            // Truncate file on startup
            let file = File::create(&path).ok()?;
            LOG_PATH.set(path).ok();
            Some(file)
        });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    let _ = match file {
        Some(file) => builder.with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}

/// Path of the active log file, if logging to a file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}
