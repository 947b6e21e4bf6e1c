// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files. A recipe is immutable once parsed; everything
//! platform-dependent is expressed as a [`Predicate`] and resolved later.

use super::predicate::Predicate;
use crate::platform::{CompilerAbi, CompilerFamily};
use crate::version::{PkgVersion, Version, VersionConstraint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use strum_macros::{Display, EnumString};

/// A complete package recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Package identity
    pub package: PackageSection,

    /// Primary source archive
    pub source: SourceSection,

    /// Secondary sources, staged on demand by `stage_resource` steps
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,

    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    /// Prebuilt bottles, keyed by platform tag
    #[serde(default)]
    pub bottle: Option<BottleManifest>,

    /// Compilers known to miscompile this package
    #[serde(default)]
    pub fails_with: Vec<CompilerSpec>,

    /// Build options selectable with `--with <name>`
    #[serde(default)]
    pub options: Vec<BuildOption>,

    /// Source patches and text substitutions, applied in order
    #[serde(default)]
    pub patches: Vec<PatchSpec>,

    /// Install procedure
    #[serde(default)]
    pub install: Vec<InstallStep>,

    #[serde(default)]
    pub test: Option<TestProcedure>,

    #[serde(default)]
    pub livecheck: Option<LivecheckSpec>,

    /// Variables for substitution
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Recipe {
    pub fn name(&self) -> &str {
        &self.package.name
    }

    pub fn version(&self) -> &Version {
        &self.package.version
    }

    /// Version plus revision
    pub fn pkg_version(&self) -> PkgVersion {
        PkgVersion::new(self.package.version.clone(), self.package.revision)
    }

    /// Substitute variables in a string
    ///
    /// Replaces `%(name)s` patterns with their values from:
    /// 1. The caller's variables (prefix, bin, buildpath, ...)
    /// 2. Built-in recipe variables (name, version)
    /// 3. Custom variables from the [variables] section
    ///
    /// Unknown variables are left in place.
    pub fn substitute(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();

        for (key, value) in vars {
            result = result.replace(&format!("%({})s", key), value);
        }

        result = result.replace("%(version)s", self.package.version.as_str());
        result = result.replace("%(name)s", &self.package.name);

        for (key, value) in &self.variables {
            result = result.replace(&format!("%({})s", key), value);
        }

        result
    }

    /// Get the source URL with variables substituted
    pub fn source_url(&self) -> String {
        self.substitute(&self.source.url, &HashMap::new())
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// True if a `fails_with` entry matches the given compiler
    pub fn fails_with_compiler(&self, compiler: &CompilerAbi) -> Option<&CompilerSpec> {
        self.fails_with.iter().find(|spec| spec.matches(compiler))
    }
}

/// Package identity section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,

    pub version: Version,

    /// Rebuild counter for the same upstream version
    #[serde(default)]
    pub revision: u32,

    /// Short description
    #[serde(default)]
    pub desc: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,
}

/// Primary source archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source URL; supports `%(version)s`
    pub url: String,
    /// Hex SHA-256 of the archive
    pub sha256: String,
}

/// A secondary named source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub url: String,
    pub sha256: String,
}

/// Dependency kinds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DependencyKind {
    /// Needed only while building from source
    Build,
    #[default]
    Runtime,
    /// Needed only to run the test procedure
    Test,
    /// Installed unless explicitly declined
    Recommended,
    /// Installed only when requested
    Optional,
}

/// A declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,

    #[serde(default)]
    pub kind: DependencyKind,

    /// Edge is dropped entirely when this does not hold
    #[serde(default, skip_serializing_if = "Predicate::is_always")]
    pub when: Predicate,

    #[serde(default)]
    pub version: VersionConstraint,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            when: Predicate::Always,
            version: VersionConstraint::Any,
        }
    }

    pub fn when(mut self, when: Predicate) -> Self {
        self.when = when;
        self
    }

    pub fn version(mut self, constraint: VersionConstraint) -> Self {
        self.version = constraint;
        self
    }
}

/// How embedded paths in a bottle relate to the local cellar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellarMode {
    /// Paths must be rewritten to the local prefix
    Any,
    /// No embedded paths; install as-is
    AnySkipRelocation,
    /// Built for exactly this cellar path
    Fixed(String),
}

impl CellarMode {
    pub fn as_str(&self) -> &str {
        match self {
            CellarMode::Any => "any",
            CellarMode::AnySkipRelocation => "any_skip_relocation",
            CellarMode::Fixed(path) => path,
        }
    }
}

impl fmt::Display for CellarMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for CellarMode {
    fn from(s: &str) -> Self {
        match s {
            "any" | ":any" => CellarMode::Any,
            "any_skip_relocation" | ":any_skip_relocation" => CellarMode::AnySkipRelocation,
            path => CellarMode::Fixed(path.to_string()),
        }
    }
}

impl Serialize for CellarMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CellarMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(CellarMode::from(s.as_str()))
    }
}

/// One prebuilt bottle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleEntry {
    pub sha256: String,
    /// Absent means the platform's default cellar
    #[serde(default)]
    pub cellar: Option<CellarMode>,
}

/// Bottle manifest: platform tag → bottle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BottleManifest {
    #[serde(default)]
    pub rebuild: u32,

    /// Overrides the configured bottle root URL
    #[serde(default)]
    pub root_url: Option<String>,

    #[serde(default)]
    pub files: BTreeMap<String, BottleEntry>,
}

/// `fails_with` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSpec {
    pub compiler: CompilerFamily,
    /// Major version; absent means every version
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub cause: Option<String>,
}

impl CompilerSpec {
    pub fn matches(&self, compiler: &CompilerAbi) -> bool {
        self.compiler == compiler.family && self.version.is_none_or(|v| v == compiler.major)
    }
}

/// A build option (`--with <name>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOption {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A source patch or text substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchSpec {
    /// Unified diff, either fetched or inline
    Diff {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        sha256: Option<String>,
        #[serde(default)]
        inline: Option<String>,
        #[serde(default = "default_strip")]
        strip: u32,
        #[serde(default, skip_serializing_if = "Predicate::is_always")]
        when: Predicate,
    },
    /// Literal text replacement in source files
    Inreplace {
        files: Vec<String>,
        find: String,
        replace: String,
        #[serde(default, skip_serializing_if = "Predicate::is_always")]
        when: Predicate,
    },
}

impl PatchSpec {
    pub fn when(&self) -> &Predicate {
        match self {
            PatchSpec::Diff { when, .. } | PatchSpec::Inreplace { when, .. } => when,
        }
    }

    /// Short label used in logs and errors
    pub fn label(&self) -> String {
        match self {
            PatchSpec::Diff {
                url: Some(url), ..
            } => url.rsplit('/').next().unwrap_or(url).to_string(),
            PatchSpec::Diff { .. } => "inline patch".to_string(),
            PatchSpec::Inreplace { files, .. } => format!("inreplace {}", files.join(", ")),
        }
    }
}

fn default_strip() -> u32 {
    1
}

/// One install step
///
/// A closed set of operations interpreted by the build executor. Every
/// string field is a template (`%(prefix)s`, `%(bin)s`, ...). Relative
/// paths resolve against the build working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum InstallStep {
    /// Run a shell command
    Run {
        command: String,
        /// Working directory relative to the source root
        #[serde(default)]
        workdir: Option<String>,
    },
    /// Set (or append to) an environment variable for later steps
    SetEnv {
        key: String,
        value: String,
        #[serde(default)]
        append: bool,
    },
    /// Literal text replacement, fatal when `find` is absent
    Inreplace {
        files: Vec<String>,
        find: String,
        replace: String,
    },
    /// Apply the patch at this index of `patches` now instead of up front
    ApplyPatch { index: usize },
    /// Extract or copy a secondary resource into a directory
    StageResource { resource: String, into: String },
    /// Copy files into a keg directory (`bin.install`)
    Install { from: Vec<String>, into: String },
    Mkdir { path: String },
    Symlink { target: String, link: String },
    /// Write a launcher script that execs `target` (`bin.write_exec_script`)
    WriteExecScript { target: String, into: String },
    /// Run `steps` when `when` holds, else `otherwise`
    Conditional {
        when: Predicate,
        steps: Vec<InstallStep>,
        #[serde(default)]
        otherwise: Vec<InstallStep>,
    },
}

impl InstallStep {
    /// Short label used in logs and errors
    pub fn label(&self) -> String {
        match self {
            InstallStep::Run { command, .. } => {
                let first = command.lines().next().unwrap_or("");
                if first.chars().count() > 60 {
                    format!("{}...", first.chars().take(60).collect::<String>())
                } else {
                    first.to_string()
                }
            }
            InstallStep::SetEnv { key, .. } => format!("set_env {}", key),
            InstallStep::Inreplace { files, .. } => format!("inreplace {}", files.join(", ")),
            InstallStep::ApplyPatch { index } => format!("apply_patch #{}", index),
            InstallStep::StageResource { resource, .. } => format!("stage_resource {}", resource),
            InstallStep::Install { into, .. } => format!("install into {}", into),
            InstallStep::Mkdir { path } => format!("mkdir {}", path),
            InstallStep::Symlink { link, .. } => format!("symlink {}", link),
            InstallStep::WriteExecScript { target, .. } => format!("write_exec_script {}", target),
            InstallStep::Conditional { when, .. } => format!("when {}", when),
        }
    }
}

/// A file written into the scratch test directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFile {
    pub path: String,
    pub content: String,
}

/// One assertion: run `command`, check exit code and output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestAssertion {
    pub command: String,
    #[serde(default)]
    pub exit_code: i32,
    /// Output (stdout + stderr) must contain this text
    #[serde(default)]
    pub contains: Option<String>,
    /// Output must match this regex
    #[serde(default)]
    pub matches: Option<String>,
}

/// Post-install validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProcedure {
    #[serde(default)]
    pub files: Vec<TestFile>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

/// Where livecheck looks for versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivecheckUrl {
    /// The recipe's source URL
    Stable,
    Homepage,
    Url(String),
}

impl Serialize for LivecheckUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LivecheckUrl::Stable => serializer.serialize_str("stable"),
            LivecheckUrl::Homepage => serializer.serialize_str("homepage"),
            LivecheckUrl::Url(u) => serializer.serialize_str(u),
        }
    }
}

impl<'de> Deserialize<'de> for LivecheckUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "stable" => LivecheckUrl::Stable,
            "homepage" => LivecheckUrl::Homepage,
            _ => LivecheckUrl::Url(s),
        })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LivecheckStrategy {
    /// Apply the regex to a fetched page
    #[default]
    PageMatch,
    /// Ask the GitHub releases API for the latest release
    GithubLatest,
}

/// Upstream version discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivecheckSpec {
    pub url: LivecheckUrl,
    #[serde(default)]
    pub strategy: LivecheckStrategy,
    /// First capture group is the version
    #[serde(default)]
    pub regex: Option<String>,
    /// Matches of these patterns are discarded
    #[serde(default)]
    pub exclude: Vec<String>,
}
