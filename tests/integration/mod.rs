//! Integration test suite for wavegen.
//!
//! These tests drive the public API end to end: manifests in, waves
//! scheduled, workers executed, results persisted. They verify that the
//! components work together correctly.
//!
//! # Test Categories
//!
//! - `pipeline`: Full orchestrator runs with in-process and shell workers
//! - `waves`: Dependency ordering properties over generated unit sets
//! - `memory`: Pressure classification and relief through the public API
//!
//! # CI Compatibility
//!
//! Workers are closures or `sh` one-liners; nothing touches the network.

mod fixtures;

mod memory;
mod pipeline;
