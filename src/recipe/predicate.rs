// src/recipe/predicate.rs

//! Platform and build-option predicates
//!
//! `on_linux`, `on_macos`, version guards, `uses_from_macos` and
//! `if build.with?` all reduce to a [`Predicate`] value evaluated once
//! against a [`PredicateContext`].

use crate::platform::{MacosRelease, PlatformDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A condition on the platform, the plan, or the enabled build options
///
/// In TOML a predicate is either a bare word (`"linux"`, `"arm"`) or a
/// single-key table (`{ macos_at_least = "monterey" }`, `{ not = "macos" }`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Always,
    Linux,
    Macos,
    Arm,
    Intel,
    MacosAtLeast(MacosRelease),
    MacosBefore(MacosRelease),
    /// The named recipe is part of the plan (or already installed)
    Dependency(String),
    /// The named build option was requested (`--with <name>`)
    #[serde(rename = "option")]
    BuildOption(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

/// What a predicate is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct PredicateContext<'a> {
    pub platform: &'a PlatformDescriptor,
    pub dependencies: &'a HashSet<String>,
    pub options: &'a HashSet<String>,
}

impl<'a> PredicateContext<'a> {
    pub fn new(
        platform: &'a PlatformDescriptor,
        dependencies: &'a HashSet<String>,
        options: &'a HashSet<String>,
    ) -> Self {
        Self {
            platform,
            dependencies,
            options,
        }
    }
}

impl Predicate {
    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    pub fn evaluate(&self, ctx: &PredicateContext<'_>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Linux => ctx.platform.is_linux(),
            Predicate::Macos => ctx.platform.is_macos(),
            Predicate::Arm => ctx.platform.arch.is_arm(),
            Predicate::Intel => !ctx.platform.arch.is_arm(),
            Predicate::MacosAtLeast(release) => ctx
                .platform
                .macos_release()
                .is_some_and(|current| current >= *release),
            Predicate::MacosBefore(release) => ctx
                .platform
                .macos_release()
                .is_some_and(|current| current < *release),
            Predicate::Dependency(name) => ctx.dependencies.contains(name),
            Predicate::BuildOption(name) => ctx.options.contains(name),
            Predicate::Not(inner) => !inner.evaluate(ctx),
            Predicate::All(all) => all.iter().all(|p| p.evaluate(ctx)),
            Predicate::Any(any) => any.iter().any(|p| p.evaluate(ctx)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => write!(f, "always"),
            Predicate::Linux => write!(f, "linux"),
            Predicate::Macos => write!(f, "macos"),
            Predicate::Arm => write!(f, "arm"),
            Predicate::Intel => write!(f, "intel"),
            Predicate::MacosAtLeast(r) => write!(f, "macos >= {}", r),
            Predicate::MacosBefore(r) => write!(f, "macos < {}", r),
            Predicate::Dependency(d) => write!(f, "dependency {}", d),
            Predicate::BuildOption(o) => write!(f, "option {}", o),
            Predicate::Not(p) => write!(f, "not ({})", p),
            Predicate::All(ps) => write_joined(f, ps, " and "),
            Predicate::Any(ps) => write_joined(f, ps, " or "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, ps: &[Predicate], sep: &str) -> fmt::Result {
    let parts: Vec<String> = ps.iter().map(|p| format!("({})", p)).collect();
    write!(f, "{}", parts.join(sep))
}
