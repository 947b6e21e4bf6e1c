// src/orchestrator/outcome.rs

//! Per-recipe outcomes of an install run

use crate::error::Error;
use crate::recipe::ArtifactSource;
use crate::resolver::ResolutionPlan;
use crate::tester::TestReport;
use crate::version::PkgVersion;
use serde::Serialize;
use std::fmt;
use strum_macros::Display;

/// Where in the pipeline a recipe was when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Resolve,
    Select,
    Fetch,
    Patch,
    Build,
    Install,
    Test,
}

impl Stage {
    /// The stage an error belongs to, when the error says so itself
    ///
    /// `Kitchen::prepare` fetches, patches and builds in one call, so the
    /// error kind decides between those.
    pub fn of_error(default: Stage, error: &Error) -> Stage {
        match error {
            Error::ResourceFetchFailure { .. } | Error::ChecksumMismatch { .. } => Stage::Fetch,
            Error::PatchApplyFailure { .. } => Stage::Patch,
            Error::IncompatibleCellar { .. } => Stage::Select,
            Error::PartialInstallFailure { .. } => Stage::Install,
            _ => default,
        }
    }
}

/// What happened to one recipe
#[derive(Debug)]
pub enum RecipeOutcome {
    /// Committed, with the test report when tests were requested
    Installed {
        version: PkgVersion,
        source: ArtifactSource,
        test: Option<TestReport>,
    },
    /// A matching receipt was already present; nothing was fetched or built
    AlreadySatisfied { version: PkgVersion },
    Failed { stage: Stage, error: Error },
    /// Never attempted because a dependency did not make it
    Skipped { blocked_by: String },
    Cancelled,
}

impl RecipeOutcome {
    /// Dependents may go ahead
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            RecipeOutcome::Installed { .. } | RecipeOutcome::AlreadySatisfied { .. }
        )
    }

    /// Available, and any test that ran passed
    pub fn is_success(&self) -> bool {
        match self {
            RecipeOutcome::Installed { test, .. } => test.as_ref().is_none_or(|t| t.passed),
            RecipeOutcome::AlreadySatisfied { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for RecipeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeOutcome::Installed {
                version,
                source,
                test,
            } => {
                match source {
                    ArtifactSource::Bottle { tag, .. } => write!(f, "installed {} (bottle {})", version, tag)?,
                    ArtifactSource::Source => write!(f, "installed {} (built from source)", version)?,
                }
                match test {
                    Some(report) if report.passed => write!(f, ", tests passed"),
                    Some(_) => write!(f, ", TESTS FAILED"),
                    None => Ok(()),
                }
            }
            RecipeOutcome::AlreadySatisfied { version } => write!(f, "{} already installed", version),
            RecipeOutcome::Failed { stage, error } => write!(f, "failed at {}: {}", stage, error),
            RecipeOutcome::Skipped { blocked_by } => write!(f, "skipped (blocked by {})", blocked_by),
            RecipeOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The result of one install run
#[derive(Debug, Default)]
pub struct InstallReport {
    pub plan: ResolutionPlan,
    /// In plan order; empty for a dry run
    pub outcomes: Vec<(String, RecipeOutcome)>,
}

impl InstallReport {
    pub fn outcome(&self, name: &str) -> Option<&RecipeOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_success())
    }

    /// Recipes that did not end up installed with passing tests
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RecipeOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(n, o)| (n.as_str(), o))
    }

    /// Recipes committed during this run
    pub fn installed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecipeOutcome::Installed { .. }))
            .map(|(n, _)| n.as_str())
    }
}
