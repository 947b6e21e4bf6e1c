// src/resolver/graph.rs

//! Dependency graph for recipe resolution
//!
//! Provides graph construction, depth-first topological ordering with cycle
//! detection, and direct reverse-dependency lookups.

use crate::error::{Error, Result};
use crate::recipe::DependencyKind;
use crate::version::VersionConstraint;
use std::collections::{HashMap, HashSet};

/// A dependency edge with its kind and version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: DependencyKind,
    pub constraint: VersionConstraint,
}

/// Dependency graph for resolution and ordering
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Node names in discovery order
    nodes: Vec<String>,
    /// Outgoing edges in declaration order
    edges: HashMap<String, Vec<DependencyEdge>>,
    /// Inbound edges, in the order they were added
    reverse_edges: HashMap<String, Vec<DependencyEdge>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; adding an existing node is a no-op
    pub fn add_node(&mut self, name: &str) {
        if !self.edges.contains_key(name) {
            self.nodes.push(name.to_string());
            self.edges.insert(name.to_string(), Vec::new());
        }
    }

    /// Add an edge, creating both endpoints as needed
    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.add_node(&edge.from);
        self.add_node(&edge.to);
        self.reverse_edges
            .entry(edge.to.clone())
            .or_default()
            .push(edge.clone());
        if let Some(out) = self.edges.get_mut(&edge.from) {
            out.push(edge);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Outgoing edges of `name`
    pub fn dependencies(&self, name: &str) -> &[DependencyEdge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inbound edges of `name`
    pub fn inbound(&self, name: &str) -> &[DependencyEdge] {
        self.reverse_edges
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names of recipes with an edge to `name`, deduplicated
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.inbound(name)
            .iter()
            .filter(|e| seen.insert(e.from.as_str()))
            .map(|e| e.from.clone())
            .collect()
    }

    /// Depth-first topological order starting from `roots`
    ///
    /// Roots are visited in the given order and edges in declaration order,
    /// so the result is deterministic. Every dependency precedes its
    /// dependents. A back edge fails with `CyclicDependency` naming the
    /// cycle, first node repeated at the end.
    pub fn topological_order(&self, roots: &[String]) -> Result<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in roots {
            if self.contains(root) {
                self.visit(root, &mut marks, &mut path, &mut order)?;
            }
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(Error::CyclicDependency { cycle });
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);
        for edge in self.dependencies(name) {
            self.visit(&edge.to, marks, path, order)?;
        }
        path.pop();
        marks.insert(name, Mark::Done);
        order.push(name.to_string());
        Ok(())
    }
}
