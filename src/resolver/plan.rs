// src/resolver/plan.rs

//! Resolution plan data structures
//!
//! Contains the result types for dependency resolution.

use crate::version::PkgVersion;
use serde::Serialize;
use std::fmt;

/// What happens to one recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    Install,
    /// Installed, but older than the catalog (explicit targets only) or
    /// failing a constraint
    Upgrade { from: PkgVersion },
    /// Installed and acceptable; nothing to do
    Satisfied { version: PkgVersion },
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanAction::Install => write!(f, "install"),
            PlanAction::Upgrade { from } => write!(f, "upgrade from {}", from),
            PlanAction::Satisfied { version } => write!(f, "satisfied ({})", version),
        }
    }
}

/// One recipe in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub recipe: String,
    /// Catalog version the step installs
    pub version: PkgVersion,
    pub action: PlanAction,
    /// Named on the command line
    pub requested: bool,
    /// Recipes whose edges pulled this one in
    pub requested_by: Vec<String>,
    /// Reached only through build dependencies
    pub build_only: bool,
    /// In-plan recipes this one waits for
    pub dependencies: Vec<String>,
    /// In-plan runtime dependencies, recorded in the receipt
    pub runtime_dependencies: Vec<String>,
}

impl PlanStep {
    pub fn is_satisfied(&self) -> bool {
        matches!(self.action, PlanAction::Satisfied { .. })
    }
}

/// Dependency-ordered recipes: for every edge A -> B, B comes first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionPlan {
    pub steps: Vec<PlanStep>,
}

impl ResolutionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.recipe == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.recipe == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.recipe.as_str())
    }

    /// Steps that install or upgrade something
    pub fn pending(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| !s.is_satisfied())
    }

    /// Nothing to install
    pub fn is_noop(&self) -> bool {
        self.pending().next().is_none()
    }
}
