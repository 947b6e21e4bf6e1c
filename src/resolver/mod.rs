// src/resolver/mod.rs

//! Dependency resolution
//!
//! Turns a set of requested recipes into a [`ResolutionPlan`]:
//!
//! 1. Walk the catalog from the targets, keeping only edges whose platform
//!    predicate holds and whose kind the options ask for. Edges that fail
//!    are dropped entirely.
//! 2. Order the graph depth-first (dependencies first); a back edge is a
//!    `CyclicDependency`.
//! 3. Check every pair of constraints on each recipe for a common version,
//!    then check each constraint against what will actually be present.
//! 4. Mark recipes whose receipt already satisfies every constraint.
//!
//! Resolution is a pure function of its inputs and never touches the
//! prefix. A recipe the receipts say is installed, but whose version fails
//! an inbound constraint, is re-resolved as an upgrade (its build edges are
//! then followed too).

mod graph;
mod plan;

pub use graph::{DependencyEdge, DependencyGraph};
pub use plan::{PlanAction, PlanStep, ResolutionPlan};

use crate::db::InstallReceipt;
use crate::error::{Error, Result};
use crate::platform::PlatformDescriptor;
use crate::recipe::{Catalog, DependencyKind, DependencySpec, PredicateContext};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Which optional edges to follow
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Follow test dependencies of the requested recipes
    pub include_test: bool,
    /// Optional dependencies to include, by name
    pub with_optional: HashSet<String>,
    /// Recommended dependencies to leave out, by name
    pub without_recommended: HashSet<String>,
    /// Enabled build options, for `option(...)` predicates
    pub build_options: HashSet<String>,
}

/// Resolve `targets` against `catalog` into an ordered plan
pub fn resolve(
    catalog: &Catalog,
    targets: &[String],
    platform: &PlatformDescriptor,
    receipts: &[InstallReceipt],
    options: &ResolveOptions,
) -> Result<ResolutionPlan> {
    Resolver::new(catalog, targets, platform, receipts, options)?.resolve()
}

struct Resolver<'a> {
    catalog: &'a Catalog,
    targets: Vec<String>,
    target_set: HashSet<String>,
    platform: &'a PlatformDescriptor,
    receipts: HashMap<&'a str, &'a InstallReceipt>,
    options: &'a ResolveOptions,
    /// What `dependency(...)` predicates see while resolving
    present: HashSet<String>,
}

impl<'a> Resolver<'a> {
    fn new(
        catalog: &'a Catalog,
        targets: &[String],
        platform: &'a PlatformDescriptor,
        receipts: &'a [InstallReceipt],
        options: &'a ResolveOptions,
    ) -> Result<Self> {
        let targets: Vec<String> = targets
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for target in &targets {
            catalog.require(target)?;
        }

        let receipts: HashMap<&str, &InstallReceipt> =
            receipts.iter().map(|r| (r.name.as_str(), r)).collect();

        let mut present: HashSet<String> = targets.iter().cloned().collect();
        present.extend(receipts.keys().map(|k| k.to_string()));
        present.extend(options.with_optional.iter().cloned());

        Ok(Self {
            catalog,
            target_set: targets.iter().cloned().collect(),
            targets,
            platform,
            receipts,
            options,
            present,
        })
    }

    fn resolve(&self) -> Result<ResolutionPlan> {
        let mut satisfied = self.initially_satisfied();
        loop {
            let graph = self.build_graph(&satisfied)?;
            let order = graph.topological_order(&self.targets)?;

            // A receipt that fails an inbound constraint has to be replaced
            let demoted: Vec<String> = order
                .iter()
                .filter(|name| satisfied.contains(*name))
                .filter(|name| {
                    let receipt = self.receipts[name.as_str()];
                    graph
                        .inbound(name)
                        .iter()
                        .any(|e| !e.constraint.satisfies(&receipt.version))
                })
                .cloned()
                .collect();
            if !demoted.is_empty() {
                debug!("Installed versions of {:?} fail constraints, re-resolving", demoted);
                for name in demoted {
                    satisfied.remove(&name);
                }
                continue;
            }

            self.check_constraints(&graph, &order, &satisfied)?;
            return self.plan(&graph, order, &satisfied);
        }
    }

    /// Installed recipes, except targets older than the catalog
    fn initially_satisfied(&self) -> HashSet<String> {
        let mut satisfied = HashSet::new();
        for (name, receipt) in &self.receipts {
            let Some(recipe) = self.catalog.get(name) else {
                continue;
            };
            if self.target_set.contains(*name) && receipt.pkg_version() < recipe.pkg_version() {
                continue;
            }
            satisfied.insert(name.to_string());
        }
        satisfied
    }

    fn include_edge(&self, from: &str, dep: &DependencySpec, satisfied: bool) -> bool {
        match dep.kind {
            DependencyKind::Runtime => true,
            DependencyKind::Build => !satisfied,
            DependencyKind::Recommended => !self.options.without_recommended.contains(&dep.name),
            DependencyKind::Optional => self.options.with_optional.contains(&dep.name),
            DependencyKind::Test => {
                !satisfied && self.options.include_test && self.target_set.contains(from)
            }
        }
    }

    fn build_graph(&self, satisfied: &HashSet<String>) -> Result<DependencyGraph> {
        let ctx = PredicateContext::new(self.platform, &self.present, &self.options.build_options);
        let mut graph = DependencyGraph::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.targets.iter().rev().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            graph.add_node(name);
            let recipe = self.catalog.require(name)?;
            let is_satisfied = satisfied.contains(name);
            let mut next = Vec::new();

            for dep in &recipe.dependencies {
                if !dep.when.evaluate(&ctx) {
                    debug!("{}: dropping {} ({} does not hold)", name, dep.name, dep.when);
                    continue;
                }
                if !self.include_edge(name, dep, is_satisfied) {
                    continue;
                }
                let Some(target) = self.catalog.get(&dep.name) else {
                    return Err(Error::UnknownRecipe {
                        name: dep.name.clone(),
                        required_by: name.to_string(),
                    });
                };
                graph.add_edge(DependencyEdge {
                    from: name.to_string(),
                    to: dep.name.clone(),
                    kind: dep.kind,
                    constraint: dep.version.clone(),
                });
                next.push(target.name());
            }
            // Popped in declaration order
            stack.extend(next.into_iter().rev());
        }
        Ok(graph)
    }

    /// Pairwise compatibility, then each constraint against the version
    /// that will be present
    fn check_constraints(
        &self,
        graph: &DependencyGraph,
        order: &[String],
        satisfied: &HashSet<String>,
    ) -> Result<()> {
        for name in order {
            let inbound = graph.inbound(name);
            for (i, first) in inbound.iter().enumerate() {
                for second in &inbound[i + 1..] {
                    if !first.constraint.is_compatible_with(&second.constraint) {
                        return Err(Error::VersionConflict {
                            package: name.clone(),
                            first: (first.from.clone(), first.constraint.to_string()),
                            second: (second.from.clone(), second.constraint.to_string()),
                        });
                    }
                }
            }

            if satisfied.contains(name) {
                continue;
            }
            let recipe = self.catalog.require(name)?;
            for edge in inbound {
                if !edge.constraint.satisfies(recipe.version()) {
                    return Err(Error::UnsatisfiableConstraint {
                        package: name.clone(),
                        available: recipe.version().to_string(),
                        constraint: edge.constraint.to_string(),
                        required_by: edge.from.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn plan(
        &self,
        graph: &DependencyGraph,
        order: Vec<String>,
        satisfied: &HashSet<String>,
    ) -> Result<ResolutionPlan> {
        // Dependents come later in the order, so walking it backwards sees
        // every dependent before its dependencies
        let mut build_only: HashMap<&str, bool> = HashMap::new();
        for name in order.iter().rev() {
            let only = !self.target_set.contains(name)
                && graph.inbound(name).iter().all(|e| {
                    e.kind == DependencyKind::Build
                        || e.kind == DependencyKind::Test
                        || build_only.get(e.from.as_str()).copied().unwrap_or(false)
                });
            build_only.insert(name.as_str(), only);
        }

        let mut steps = Vec::with_capacity(order.len());
        for name in &order {
            let recipe = self.catalog.require(name)?;
            let action = match self.receipts.get(name.as_str()) {
                Some(receipt) if satisfied.contains(name) => PlanAction::Satisfied {
                    version: receipt.pkg_version(),
                },
                Some(receipt) => PlanAction::Upgrade {
                    from: receipt.pkg_version(),
                },
                None => PlanAction::Install,
            };

            let mut dependencies = Vec::new();
            let mut runtime_dependencies = Vec::new();
            for edge in graph.dependencies(name) {
                if !dependencies.contains(&edge.to) {
                    dependencies.push(edge.to.clone());
                }
                let runtime = matches!(
                    edge.kind,
                    DependencyKind::Runtime | DependencyKind::Recommended | DependencyKind::Optional
                );
                if runtime && !runtime_dependencies.contains(&edge.to) {
                    runtime_dependencies.push(edge.to.clone());
                }
            }

            steps.push(PlanStep {
                recipe: name.clone(),
                version: recipe.pkg_version(),
                action,
                requested: self.target_set.contains(name),
                requested_by: graph.dependents(name),
                build_only: build_only.get(name.as_str()).copied().unwrap_or(false),
                dependencies,
                runtime_dependencies,
            });
        }
        Ok(ResolutionPlan { steps })
    }
}
