//! Generation units and the manifest they are loaded from.
//!
//! A unit is one template: a unique name, the names it depends on, and a
//! priority that orders otherwise independent units.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// A single unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unique key within a run.
    pub name: String,
    /// Names of units that must finish before this one starts. Sorted and
    /// deduplicated, whatever order the manifest lists them in.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Higher runs earlier when otherwise unordered.
    #[serde(default)]
    pub priority: i64,
    /// Opaque body handed to the worker.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

impl Unit {
    /// Create a unit with no dependencies and priority 0.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dependencies: BTreeSet::new(),
            priority: 0,
            content: Value::Null,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains(name)
    }
}

/// A unit list read from a TOML file.
///
/// ```toml
/// [[unit]]
/// name = "schema"
/// priority = 10
///
/// [[unit]]
/// name = "api"
/// dependencies = ["schema"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "unit")]
    pub units: Vec<Unit>,
}

impl Manifest {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Manifest::load");
        if !path.exists() {
            return Err(Error::Manifest(format!(
                "manifest not found: {}",
                path.display()
            )));
        }
        let manifest = Self::parse(&fs::read_to_string(path)?)?;
        debug!(units = manifest.units.len(), "Manifest loaded");
        Ok(manifest)
    }

    pub fn into_units(self) -> Vec<Unit> {
        self.units
    }
}
