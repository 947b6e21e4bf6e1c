// src/recipe/kitchen/config.rs

//! Configuration and result types for the Kitchen

use crate::fetch::RetryPolicy;
use crate::version::PkgVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Download cache directory
    pub source_cache: PathBuf,
    /// Parallel make jobs passed through `MAKEFLAGS`
    pub jobs: usize,
    /// Retry budget for each download
    pub retry: RetryPolicy,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self {
            source_cache: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("keg")
                .join("downloads"),
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            retry: RetryPolicy::default(),
        }
    }
}

/// Where an artifact's files came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    Bottle {
        tag: String,
        sha256: String,
        cellar: String,
    },
    Source,
}

impl ArtifactSource {
    pub fn is_bottle(&self) -> bool {
        matches!(self, ArtifactSource::Bottle { .. })
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSource::Bottle { tag, .. } => write!(f, "bottle {}", tag),
            ArtifactSource::Source => write!(f, "source"),
        }
    }
}

/// A staged keg ready for the Cellar
///
/// Owns the temporary build tree. Dropping the artifact deletes it, so an
/// artifact that is never committed leaves nothing behind.
#[derive(Debug)]
pub struct BuildArtifact {
    pub name: String,
    pub pkg_version: PkgVersion,
    /// Final keg path the staged tree is destined for
    pub keg_path: PathBuf,
    pub source: ArtifactSource,
    /// Build log (commands and their output), diagnostics only
    pub log: String,
    pub warnings: Vec<String>,
    pub(super) staged_keg: PathBuf,
    pub(super) build_dir: TempDir,
}

impl BuildArtifact {
    /// Wrap an already staged keg
    ///
    /// `staged_keg` must live inside `build_dir`, which the artifact takes
    /// ownership of.
    pub fn new(
        name: impl Into<String>,
        pkg_version: PkgVersion,
        keg_path: PathBuf,
        source: ArtifactSource,
        build_dir: TempDir,
        staged_keg: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            pkg_version,
            keg_path,
            source,
            log: String::new(),
            warnings: Vec::new(),
            staged_keg,
            build_dir,
        }
    }

    /// Root of the staged keg contents
    pub fn staged_keg(&self) -> &Path {
        &self.staged_keg
    }

    /// Temporary build directory (sources, destdir, scratch)
    pub fn build_dir(&self) -> &Path {
        self.build_dir.path()
    }
}
