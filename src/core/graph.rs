//! Unit dependency graph.
//!
//! Nodes are unit names in submission order; an edge `a -> b` means `b`
//! depends on `a`. Dependencies that name no submitted unit have no node and
//! no edge; callers that care about them use [`UnitGraph::external_dependencies`].

use petgraph::algo::{is_cyclic_directed, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::unit::Unit;
use crate::error::{Error, Result};

pub struct UnitGraph {
    graph: DiGraph<String, ()>,
    /// Index mapping from unit name to NodeIndex for fast lookups.
    index: HashMap<String, NodeIndex>,
    /// Dependencies naming units outside the graph.
    external: BTreeSet<String>,
}

impl UnitGraph {
    /// Build the graph for a unit set.
    ///
    /// Duplicate names collapse onto the first occurrence's node; their
    /// dependencies are merged.
    pub fn from_units(units: &[Unit]) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for unit in units {
            index
                .entry(unit.name.clone())
                .or_insert_with(|| graph.add_node(unit.name.clone()));
        }

        let mut external = BTreeSet::new();
        for unit in units {
            let to = index[&unit.name];
            for dep in &unit.dependencies {
                match index.get(dep) {
                    Some(&from) => {
                        if graph.find_edge(from, to).is_none() {
                            graph.add_edge(from, to, ());
                        }
                    }
                    None => {
                        external.insert(dep.clone());
                    }
                }
            }
        }

        Self {
            graph,
            index,
            external,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Dependency names that are not units of this graph, sorted.
    pub fn external_dependencies(&self) -> &BTreeSet<String> {
        &self.external
    }

    /// In-graph dependencies of a unit, in submission order.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Units that depend on the given unit, in submission order.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        nodes.sort();
        nodes.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Every dependency cycle, each as a closed walk of unit names.
    ///
    /// A cycle starts at its earliest-submitted member and follows
    /// "depends on" edges; the closing edge back to the start is implied.
    /// Cycles are ordered by their starting unit.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<(NodeIndex, Vec<String>)> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.find_edge(component[0], component[0]).is_some()
            })
            .filter_map(|component| {
                let members: HashSet<NodeIndex> = component.iter().copied().collect();
                let start = *component.iter().min()?;
                Some((start, self.trace_cycle(start, &members)))
            })
            .collect();
        cycles.sort_by_key(|(start, _)| *start);
        cycles.into_iter().map(|(_, cycle)| cycle).collect()
    }

    fn trace_cycle(&self, start: NodeIndex, members: &HashSet<NodeIndex>) -> Vec<String> {
        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        if !self.walk_back(start, start, members, &mut path, &mut visited) {
            // Unreachable for a strongly connected component; report members instead.
            path = members.iter().copied().collect();
            path.sort();
        }
        path.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    fn walk_back(
        &self,
        current: NodeIndex,
        start: NodeIndex,
        members: &HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(current, Direction::Incoming)
            .filter(|n| members.contains(n))
            .collect();
        deps.sort();

        for dep in deps {
            if dep == start {
                return true;
            }
            if visited.insert(dep) {
                path.push(dep);
                if self.walk_back(dep, start, members, path, visited) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Units in an order where each comes after all of its dependencies.
    ///
    /// # Errors
    /// Returns an error naming one unit on a cycle if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| Error::CircularDependency {
            cycles: vec![vec![self.graph[cycle.node_id()].clone()]],
        })?;
        Ok(sorted.into_iter().map(|n| self.graph[n].as_str()).collect())
    }
}

impl std::fmt::Debug for UnitGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitGraph")
            .field("units", &self.unit_count())
            .field("dependencies", &self.dependency_count())
            .field("external", &self.external.len())
            .finish()
    }
}
