//! Validation gate.
//!
//! Runs once before any wave is built. Content errors, cycles and missing
//! dependencies are all fatal and are reported in that order.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use tracing::{debug, warn};

use crate::core::graph::UnitGraph;
use crate::core::unit::Unit;
use crate::error::{Error, Result};

/// Unit names double as output file names: no separators, no leading dot.
static UNIT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").unwrap());

/// Content check outcome for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl UnitValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.is_valid = false;
    }
}

/// Dependency check outcome for a unit set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    /// Each cycle as the unit names along it, starting at its earliest unit.
    pub circular_dependencies: Vec<Vec<String>>,
    /// Sorted, deduplicated.
    pub missing_dependencies: Vec<String>,
}

impl DependencyReport {
    pub fn is_clean(&self) -> bool {
        self.circular_dependencies.is_empty() && self.missing_dependencies.is_empty()
    }
}

/// Checks unit content and the dependency graph.
pub trait Validator: Send + Sync {
    /// One entry per distinct unit name.
    fn validate_units(&self, units: &[Unit]) -> BTreeMap<String, UnitValidation>;

    fn validate_dependencies(&self, units: &[Unit]) -> DependencyReport;
}

/// Structural validator used when none is supplied.
#[derive(Debug, Clone, Default)]
pub struct DefaultValidator {
    /// Dependency names that resolve outside the submitted set.
    known: HashSet<String>,
}

impl DefaultValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat these names as satisfied even when not submitted.
    pub fn with_known<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.extend(names.into_iter().map(Into::into));
        self
    }

    fn check_unit(unit: &Unit, result: &mut UnitValidation) {
        if unit.name.is_empty() {
            result.push("name is empty");
        } else if !UNIT_NAME_RE.is_match(&unit.name) {
            result.push(format!("invalid name '{}'", unit.name));
        }

        if unit.dependencies.iter().any(|dep| dep.trim().is_empty()) {
            result.push("empty dependency name");
        }

        match unit.content {
            Value::Null | Value::String(_) | Value::Object(_) => {}
            _ => result.push("content must be a string or a table"),
        }
    }
}

impl Validator for DefaultValidator {
    fn validate_units(&self, units: &[Unit]) -> BTreeMap<String, UnitValidation> {
        let mut results: BTreeMap<String, UnitValidation> = BTreeMap::new();
        for unit in units {
            match results.get_mut(&unit.name) {
                Some(existing) => existing.push("duplicate unit name"),
                None => {
                    let mut result = UnitValidation::valid();
                    Self::check_unit(unit, &mut result);
                    results.insert(unit.name.clone(), result);
                }
            }
        }
        results
    }

    fn validate_dependencies(&self, units: &[Unit]) -> DependencyReport {
        let graph = UnitGraph::from_units(units);
        let missing_dependencies = graph
            .external_dependencies()
            .iter()
            .filter(|dep| !dep.is_empty() && !self.known.contains(*dep))
            .cloned()
            .collect();
        DependencyReport {
            circular_dependencies: graph.cycles(),
            missing_dependencies,
        }
    }
}

/// Fail fast on anything that would make a run meaningless.
///
/// # Errors
/// [`Error::ContentValidation`] listing every invalid unit, then
/// [`Error::CircularDependency`], then [`Error::MissingDependency`].
pub fn validate_templates_before_processing(
    validator: &dyn Validator,
    units: &[Unit],
) -> Result<()> {
    let invalid: Vec<String> = validator
        .validate_units(units)
        .into_iter()
        .filter(|(_, result)| !result.is_valid)
        .map(|(name, result)| format!("{}: {}", display_name(&name), result.errors.join(", ")))
        .collect();
    if !invalid.is_empty() {
        warn!(invalid = invalid.len(), "content validation failed");
        return Err(Error::ContentValidation(invalid.join("\n")));
    }

    let report = validator.validate_dependencies(units);
    if !report.circular_dependencies.is_empty() {
        warn!(cycles = ?report.circular_dependencies, "circular dependencies");
        return Err(Error::CircularDependency {
            cycles: report.circular_dependencies,
        });
    }
    if !report.missing_dependencies.is_empty() {
        warn!(missing = ?report.missing_dependencies, "missing dependencies");
        return Err(Error::MissingDependency {
            missing: report.missing_dependencies,
        });
    }

    debug!(units = units.len(), "validation passed");
    Ok(())
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "<unnamed>"
    } else {
        name
    }
}
