// src/error.rs

//! Error types for keg
//!
//! Resolution errors (`CyclicDependency`, `VersionConflict`, ...) are raised
//! before anything touches the prefix. Build and install errors carry enough
//! context (recipe, step, stderr tail) for the caller to report a failure
//! without digging through logs.

use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by keg
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph contains a cycle; the path starts and ends
    /// with the same recipe
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Two recipes require versions of the same dependency that no single
    /// version can satisfy
    #[error(
        "Version conflict on {package}: {} requires {}, but {} requires {}",
        first.0, first.1, second.0, second.1
    )]
    VersionConflict {
        package: String,
        /// (requiring recipe, constraint)
        first: (String, String),
        /// (requiring recipe, constraint)
        second: (String, String),
    },

    /// The catalog version of a dependency does not satisfy a constraint
    #[error("{package} {available} does not satisfy {constraint} required by {required_by}")]
    UnsatisfiableConstraint {
        package: String,
        available: String,
        constraint: String,
        required_by: String,
    },

    #[error("Unknown recipe {name} (required by {required_by})")]
    UnknownRecipe { name: String, required_by: String },

    /// A fixed-cellar bottle was built for a different prefix layout
    #[error("Bottle {tag} requires cellar {expected}, but the local cellar is {actual}")]
    IncompatibleCellar {
        tag: String,
        expected: String,
        actual: String,
    },

    /// Fetch failed after exhausting the retry budget (or failed permanently)
    #[error("Failed to fetch {url} after {attempts} attempt(s): {reason}")]
    ResourceFetchFailure {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Checksum mismatch for {resource}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        resource: String,
        expected: String,
        actual: String,
    },

    #[error("Patch {patch} failed to apply: {reason}")]
    PatchApplyFailure { patch: String, reason: String },

    #[error("Build step `{step}` failed ({}){}", exit_label(*exit_code), stderr_suffix(stderr_tail))]
    BuildStepFailure {
        step: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("{recipe} cannot be built with {compiler}")]
    UnsupportedCompiler { recipe: String, compiler: String },

    /// File placement failed; every file already placed was removed
    #[error("Install of {recipe} failed after placing {placed} file(s): {reason}")]
    PartialInstallFailure {
        recipe: String,
        placed: usize,
        reason: String,
    },

    #[error("Tests failed for {recipe}: {reason}")]
    TestFailure { recipe: String, reason: String },

    #[error("{0} is not installed")]
    NotInstalled(String),

    /// Uninstall refused while other installed recipes need this one
    #[error("Refusing to uninstall {name}: required by {}", dependents.join(", "))]
    HasDependents { name: String, dependents: Vec<String> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Livecheck failed: {0}")]
    LivecheckError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    /// A path from a recipe or archive escapes its root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for resolution-time failures, raised before any side effects
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Error::CyclicDependency { .. }
                | Error::VersionConflict { .. }
                | Error::UnsatisfiableConstraint { .. }
                | Error::UnknownRecipe { .. }
        )
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "killed or timed out".to_string(),
    }
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}
