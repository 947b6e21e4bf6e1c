// src/lib.rs

//! keg: dependency-aware build and install orchestration for package recipes
//!
//! Recipes describe a package (source, dependencies, prebuilt bottles,
//! install steps, a test procedure, a livecheck block). keg resolves a
//! request into an ordered plan, prefers a compatible bottle over building,
//! stages every keg in a temporary tree and commits it into the Cellar only
//! once it is complete.
//!
//! # Architecture
//!
//! - `recipe`: recipe model, parser, catalog, and the Kitchen that cooks
//!   sources or pours bottles into a staged keg
//! - `resolver`: dependency graph and resolution plan
//! - `bottle`: bottle selection for the running platform
//! - `cellar`: atomic commit, opt links, uninstall
//! - `db`: SQLite receipt store
//! - `orchestrator`: runs a plan with bounded parallelism
//! - `tester`: post-install test procedures
//! - `livecheck`: upstream version discovery

pub mod bottle;
pub mod cancel;
pub mod cellar;
pub mod config;
pub mod db;
mod error;
pub mod exec;
pub mod fetch;
pub mod filesystem;
pub mod hash;
pub mod layout;
pub mod livecheck;
pub mod orchestrator;
pub mod platform;
pub mod progress;
pub mod recipe;
pub mod resolver;
pub mod tester;
pub mod version;

pub use cancel::CancellationToken;
pub use config::KegConfig;
pub use error::{Error, Result};
pub use orchestrator::{InstallOptions, InstallReport, Orchestrator, RecipeOutcome};
pub use progress::{CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress};
pub use recipe::{Catalog, Kitchen, KitchenConfig, Recipe};
pub use version::{PkgVersion, Version};
