// src/recipe/mod.rs

//! Recipe model
//!
//! A recipe describes one installable package:
//! - Identity (name, version, revision)
//! - Primary source and secondary resources with their checksums
//! - Dependencies, each with a kind, a platform predicate and a constraint
//! - A bottle manifest keyed by platform tag
//! - Patches and install steps
//! - A test procedure and a livecheck block
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "luau"
//! version = "0.578"
//! desc = "Fast, safe, gradually typed embeddable scripting language"
//! license = "MIT"
//!
//! [source]
//! url = "https://github.com/Roblox/luau/archive/refs/tags/%(version)s.tar.gz"
//! sha256 = "..."
//!
//! [[dependencies]]
//! name = "cmake"
//! kind = "build"
//!
//! [[install]]
//! step = "run"
//! command = "cmake -S . -B build %(std_cmake_args)s && cmake --build build"
//!
//! [[install]]
//! step = "install"
//! from = ["build/luau", "build/luau-analyze"]
//! into = "%(bin)s"
//!
//! [test]
//! files = [{ path = "test.lua", content = "print('Homebrew is awesome!')" }]
//! assertions = [{ command = "%(bin)s/luau test.lua", contains = "Homebrew is awesome!" }]
//! ```

mod catalog;
mod format;
pub mod kitchen;
pub mod parser;
mod predicate;

pub use catalog::Catalog;
pub use format::{
    BottleEntry, BottleManifest, BuildOption, CellarMode, CompilerSpec, DependencyKind,
    DependencySpec, InstallStep, LivecheckSpec, LivecheckStrategy, LivecheckUrl, PackageSection,
    PatchSpec, Recipe, ResourceSpec, SourceSection, TestAssertion, TestFile, TestProcedure,
};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
pub use predicate::{Predicate, PredicateContext};
pub use kitchen::{ArtifactSource, BuildArtifact, CookRequest, Kitchen, KitchenConfig};
