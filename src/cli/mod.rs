// src/cli/mod.rs
//! CLI definitions for keg
//!
//! Command implementations live in the `commands` module.
//!
//! - `install` - Resolve, build or pour, commit and optionally test
//! - `test` - Run an installed recipe's test procedure
//! - `livecheck` - Look for newer upstream versions
//! - `fetch` - Download and verify without building
//! - `deps` - Print the resolution plan
//! - `list` - List installed recipes
//! - `uninstall` - Remove an installed recipe

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keg")]
#[command(author = "Keg Contributors")]
#[command(version)]
#[command(about = "Dependency-aware build and install orchestrator for package recipes", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command; they override the config file
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default: <config dir>/keg/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Install prefix
    #[arg(long, global = true)]
    pub prefix: Option<PathBuf>,

    /// Recipe directory
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Download cache directory
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Plain log output instead of progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install recipes and their dependencies
    Install {
        /// Recipe names
        #[arg(required = true)]
        names: Vec<String>,

        /// Build from source even when a bottle is available
        #[arg(short = 's', long)]
        build_from_source: bool,

        /// Run each requested recipe's test procedure after installing
        #[arg(long)]
        test: bool,

        /// Enable a build option or optional dependency (repeatable)
        #[arg(long, value_name = "NAME")]
        with: Vec<String>,

        /// Leave out a recommended dependency (repeatable)
        #[arg(long, value_name = "NAME")]
        without: Vec<String>,

        /// Recipes processed in parallel
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Show the plan without installing anything
        #[arg(long)]
        dry_run: bool,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Run the test procedure of an installed recipe
    Test {
        name: String,
    },

    /// Check upstream for newer versions (all recipes with a livecheck
    /// block when no names are given)
    Livecheck {
        names: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download and verify resources without building
    Fetch {
        #[arg(required = true)]
        names: Vec<String>,

        /// Fetch source resources even when a bottle is available
        #[arg(short = 's', long)]
        build_from_source: bool,
    },

    /// Print the resolution plan
    Deps {
        #[arg(required = true)]
        names: Vec<String>,

        /// Include test dependencies of the named recipes
        #[arg(long)]
        include_test: bool,

        #[arg(long, value_name = "NAME")]
        with: Vec<String>,

        #[arg(long, value_name = "NAME")]
        without: Vec<String>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List installed recipes
    List {
        /// Only recipes installed on request
        #[arg(long)]
        requested: bool,
    },

    /// Remove an installed recipe
    Uninstall {
        name: String,

        /// Remove even if other installed recipes depend on it
        #[arg(long)]
        ignore_dependents: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_flags() {
        let cli = Cli::try_parse_from([
            "keg", "install", "luau", "sysdig", "-s", "--test", "--with", "lua", "--jobs", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Install {
                names,
                build_from_source,
                test,
                with,
                jobs,
                dry_run,
                ..
            } => {
                assert_eq!(names, vec!["luau", "sysdig"]);
                assert!(build_from_source);
                assert!(test);
                assert_eq!(with, vec!["lua"]);
                assert_eq!(jobs, Some(3));
                assert!(!dry_run);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_install_requires_a_name() {
        assert!(Cli::try_parse_from(["keg", "install"]).is_err());
    }
}
