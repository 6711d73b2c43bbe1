pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod memory;
pub mod orchestration;
pub mod perf;
pub mod validation;

pub use error::{Error, Result, TaskError};
