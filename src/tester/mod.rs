// src/tester/mod.rs

//! Post-install test runner
//!
//! Runs a recipe's test procedure against its installed keg. Each run gets
//! a fresh scratch directory that doubles as `HOME` and `%(testpath)s`;
//! the test files are written there and every assertion runs there.
//! Nothing here writes to the keg or the receipt store, and a failing
//! test is reported in the [`TestReport`], never rolled back.

use crate::cancel::CancellationToken;
use crate::db::{InstallReceipt, ReceiptStore};
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, STDERR_TAIL_LINES, tail_lines};
use crate::filesystem::safe_join;
use crate::layout::{KegPaths, PrefixLayout};
use crate::recipe::{Recipe, TestAssertion};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionResult {
    /// Command after variable substitution
    pub command: String,
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
    pub passed: bool,
    /// Why the assertion failed
    pub reason: Option<String>,
}

/// Outcome of a test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub recipe: String,
    pub passed: bool,
    pub results: Vec<AssertionResult>,
}

impl TestReport {
    /// A run that could not get as far as its assertions
    pub fn errored(recipe: &str, error: &Error) -> Self {
        Self {
            recipe: recipe.to_string(),
            passed: false,
            results: vec![AssertionResult {
                command: String::new(),
                exit_code: None,
                output: String::new(),
                passed: false,
                reason: Some(error.to_string()),
            }],
        }
    }

    /// `TestFailure` describing the first failed assertion, if any
    pub fn failure(&self) -> Option<Error> {
        let failed = self.results.iter().find(|r| !r.passed)?;
        let why = failed.reason.as_deref().unwrap_or("failed");
        let mut reason = if failed.command.is_empty() {
            why.to_string()
        } else {
            format!("`{}`: {}", failed.command, why)
        };
        let tail = tail_lines(&failed.output, STDERR_TAIL_LINES);
        if !tail.is_empty() {
            reason.push('\n');
            reason.push_str(&tail);
        }
        Some(Error::TestFailure {
            recipe: self.recipe.clone(),
            reason,
        })
    }
}

/// Runs test procedures
pub struct TestRunner {
    layout: PrefixLayout,
    runner: Arc<dyn CommandRunner>,
}

impl TestRunner {
    pub fn new(layout: PrefixLayout, runner: Arc<dyn CommandRunner>) -> Self {
        Self { layout, runner }
    }

    /// Test an installed recipe, looking its receipt up in `store`
    pub fn test_installed(
        &self,
        recipe: &Recipe,
        store: &dyn ReceiptStore,
        cancel: &CancellationToken,
    ) -> Result<TestReport> {
        let receipt = store
            .get(recipe.name())?
            .ok_or_else(|| Error::NotInstalled(recipe.name().to_string()))?;
        self.run(recipe, &receipt, cancel)
    }

    /// Run `recipe`'s test procedure against the keg `receipt` describes
    ///
    /// Assertions run in order and the run stops at the first failure.
    pub fn run(
        &self,
        recipe: &Recipe,
        receipt: &InstallReceipt,
        cancel: &CancellationToken,
    ) -> Result<TestReport> {
        let mut report = TestReport {
            recipe: recipe.name().to_string(),
            passed: true,
            results: Vec::new(),
        };
        let Some(procedure) = &recipe.test else {
            warn!("{} has no test procedure", recipe.name());
            return Ok(report);
        };

        info!("Testing {} {}", recipe.name(), receipt.pkg_version());
        let scratch = tempfile::Builder::new()
            .prefix(&format!("keg-test-{}-", recipe.name()))
            .tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create test directory: {}", e)))?;
        let testpath = scratch.path();

        let vars = self.template_vars(recipe, receipt, testpath);
        let env = self.test_env(receipt, testpath);

        for file in &procedure.files {
            let path = safe_join(testpath, recipe.substitute(&file.path, &vars))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, recipe.substitute(&file.content, &vars))?;
            debug!("Wrote test file {}", path.display());
        }

        for assertion in &procedure.assertions {
            cancel.check()?;
            let result = self.check(recipe, assertion, &vars, &env, testpath)?;
            let passed = result.passed;
            report.results.push(result);
            if !passed {
                report.passed = false;
                break;
            }
        }

        if report.passed {
            info!("{}: {} assertion(s) passed", recipe.name(), report.results.len());
        } else {
            warn!("{}: test failed", recipe.name());
        }
        Ok(report)
    }

    fn check(
        &self,
        recipe: &Recipe,
        assertion: &TestAssertion,
        vars: &HashMap<String, String>,
        env: &[(String, String)],
        testpath: &Path,
    ) -> Result<AssertionResult> {
        let command = recipe.substitute(&assertion.command, vars);
        debug!("Test assertion: {}", command);
        let output = self.runner.run(&command, env, testpath)?;
        let combined = output.combined();

        let reason = if output.exit_code != Some(assertion.exit_code) {
            Some(format!(
                "expected exit code {}, got {}",
                assertion.exit_code,
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none (killed)".to_string())
            ))
        } else if let Some(needle) = &assertion.contains {
            let needle = recipe.substitute(needle, vars);
            (!combined.contains(&needle)).then(|| format!("output does not contain {:?}", needle))
        } else {
            None
        };

        let reason = match (reason, &assertion.matches) {
            (Some(reason), _) => Some(reason),
            (None, Some(pattern)) => match Regex::new(pattern) {
                Ok(re) => (!re.is_match(&combined)).then(|| format!("output does not match /{}/", pattern)),
                Err(e) => Some(format!("invalid pattern /{}/: {}", pattern, e)),
            },
            (None, None) => None,
        };

        Ok(AssertionResult {
            command,
            exit_code: output.exit_code,
            output: combined,
            passed: reason.is_none(),
            reason,
        })
    }

    /// Keg variables point at the installed keg, not a staging root
    fn template_vars(
        &self,
        recipe: &Recipe,
        receipt: &InstallReceipt,
        testpath: &Path,
    ) -> HashMap<String, String> {
        let keg = KegPaths::new(&self.layout, recipe.name(), receipt.keg_path.clone());
        let mut vars = keg.template_vars();
        vars.insert("testpath".to_string(), testpath.to_string_lossy().to_string());
        vars.insert("opt".to_string(), self.layout.opt_dir().to_string_lossy().to_string());
        for dep in &recipe.dependencies {
            vars.insert(
                format!("opt:{}", dep.name),
                self.layout.opt_path(&dep.name).to_string_lossy().to_string(),
            );
        }
        vars
    }

    fn test_env(&self, receipt: &InstallReceipt, testpath: &Path) -> Vec<(String, String)> {
        let mut path = format!(
            "{}:{}",
            receipt.keg_path.join("bin").display(),
            self.layout.prefix().join("bin").display()
        );
        if let Ok(host_path) = std::env::var("PATH") {
            path = format!("{}:{}", path, host_path);
        }
        vec![
            ("HOME".to_string(), testpath.to_string_lossy().to_string()),
            ("PATH".to_string(), path),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteReceiptStore;
    use crate::exec::CommandOutput;
    use crate::recipe::{ArtifactSource, parse_recipe};
    use crate::version::Version;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Replies to commands by prefix and records what it saw
    struct Scripted {
        replies: Vec<(&'static str, CommandOutput)>,
        seen: Mutex<Vec<(String, PathBuf, Vec<(String, String)>)>>,
    }

    impl CommandRunner for Scripted {
        fn run(&self, command: &str, env: &[(String, String)], workdir: &Path) -> Result<CommandOutput> {
            self.seen
                .lock()
                .unwrap()
                .push((command.to_string(), workdir.to_path_buf(), env.to_vec()));
            Ok(self
                .replies
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, out)| out.clone())
                .unwrap_or_default())
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn recipe() -> Recipe {
        parse_recipe(&format!(
            r#"
[package]
name = "luau"
version = "0.578"

[source]
url = "https://example.com/luau-0.578.tar.gz"
sha256 = "{}"

[test]
files = [{{ path = "test.lua", content = "print('Homebrew is awesome!')" }}]

[[test.assertions]]
command = "%(bin)s/luau test.lua"
contains = "Homebrew is awesome!"

[[test.assertions]]
command = "%(bin)s/luau --version"
matches = "^Luau \\d+\\.\\d+"
"#,
            "a".repeat(64)
        ))
        .unwrap()
    }

    fn receipt() -> InstallReceipt {
        InstallReceipt {
            name: "luau".into(),
            version: Version::parse("0.578").unwrap(),
            revision: 0,
            source: ArtifactSource::Source,
            installed_at: Utc::now(),
            installed_on_request: true,
            runtime_dependencies: vec![],
            keg_path: PathBuf::from("/opt/keg/Cellar/luau/0.578"),
            files: vec![],
        }
    }

    #[test]
    fn test_passing_run_uses_scratch_dir() {
        let runner = Arc::new(Scripted {
            replies: vec![
                ("/opt/keg/Cellar/luau/0.578/bin/luau test.lua", ok("Homebrew is awesome!\n")),
                ("/opt/keg/Cellar/luau/0.578/bin/luau --version", ok("Luau 0.578\n")),
            ],
            seen: Mutex::new(Vec::new()),
        });
        let tester = TestRunner::new(PrefixLayout::new("/opt/keg"), runner.clone());
        let report = tester.run(&recipe(), &receipt(), &CancellationToken::new()).unwrap();

        assert!(report.passed, "{:?}", report);
        assert_eq!(report.results.len(), 2);
        assert!(report.failure().is_none());

        let seen = runner.seen.lock().unwrap();
        let (_, workdir, env) = &seen[0];
        assert!(env.iter().any(|(k, v)| k == "HOME" && Path::new(v) == workdir));
        // Scratch directory is gone once the run is over
        assert!(!workdir.exists());
    }

    #[test]
    fn test_failure_stops_and_reports() {
        let runner = Arc::new(Scripted {
            replies: vec![(
                "/opt/keg/Cellar/luau/0.578/bin/luau test.lua",
                CommandOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "segfault\n".into(),
                },
            )],
            seen: Mutex::new(Vec::new()),
        });
        let tester = TestRunner::new(PrefixLayout::new("/opt/keg"), runner.clone());
        let report = tester.run(&recipe(), &receipt(), &CancellationToken::new()).unwrap();

        assert!(!report.passed);
        assert_eq!(report.results.len(), 1);
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
        match report.failure() {
            Some(Error::TestFailure { recipe, reason }) => {
                assert_eq!(recipe, "luau");
                assert!(reason.contains("expected exit code 0, got 1"));
                assert!(reason.contains("segfault"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_requires_receipt() {
        let runner = Arc::new(Scripted {
            replies: vec![],
            seen: Mutex::new(Vec::new()),
        });
        let tester = TestRunner::new(PrefixLayout::new("/opt/keg"), runner);
        let store = SqliteReceiptStore::in_memory().unwrap();
        let err = tester
            .test_installed(&recipe(), &store, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotInstalled(name) if name == "luau"));
    }
}
