//! Wave partitioning.
//!
//! Splits a unit set into ordered waves. Every unit in wave `k` has all of
//! its submitted dependencies in waves `0..k`, so a wave can run fully in
//! parallel once the previous one has returned.

use serde::Serialize;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::core::unit::Unit;

/// An ordered batch of units that may run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wave {
    pub index: usize,
    pub units: Vec<Unit>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }
}

/// Waves plus the units that had to be force-placed to break cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WavePlan {
    pub waves: Vec<Wave>,
    pub forced_breaks: Vec<String>,
}

impl WavePlan {
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    pub fn max_width(&self) -> usize {
        self.waves.iter().map(Wave::len).max().unwrap_or(0)
    }

    pub fn unit_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    /// Index of the wave holding `name`.
    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.waves
            .iter()
            .find(|w| w.units.iter().any(|u| u.name == name))
            .map(|w| w.index)
    }
}

/// Partition units into dependency-ordered waves.
pub fn build_waves(units: &[Unit]) -> Vec<Wave> {
    plan_waves(units).waves
}

/// Partition units into waves and record any cycle breaks.
///
/// Units are taken in priority order (highest first, submission order on
/// ties). A unit joins the current wave when each dependency is either in an
/// earlier wave or not part of the set at all. When nothing qualifies the
/// remaining units form a cycle; the highest-priority one is placed alone so
/// the loop always terminates within `units.len()` passes.
pub fn plan_waves(units: &[Unit]) -> WavePlan {
    let submitted: HashSet<&str> = units.iter().map(|u| u.name.as_str()).collect();

    let mut remaining: Vec<&Unit> = units.iter().collect();
    // sort_by is stable: equal priorities keep submission order
    remaining.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut placed: HashSet<&str> = HashSet::new();
    let mut plan = WavePlan::default();

    while !remaining.is_empty() {
        let (eligible, mut rest): (Vec<&Unit>, Vec<&Unit>) =
            remaining.into_iter().partition(|unit| {
                unit.dependencies
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()) || !submitted.contains(dep.as_str()))
            });

        let wave_units = if eligible.is_empty() {
            let forced = rest.remove(0);
            warn!(
                unit = %forced.name,
                wave = plan.waves.len(),
                remaining = rest.len(),
                "circular dependency break: force-placing unit"
            );
            plan.forced_breaks.push(forced.name.clone());
            vec![forced]
        } else {
            eligible
        };

        placed.extend(wave_units.iter().map(|&u| u.name.as_str()));

        let wave = Wave {
            index: plan.waves.len(),
            units: wave_units.into_iter().cloned().collect(),
        };
        debug!(wave = wave.index, units = ?wave.names(), "wave built");
        plan.waves.push(wave);
        remaining = rest;
    }

    plan
}
