// src/orchestrator/mod.rs

//! Install orchestration
//!
//! Drives a whole install run:
//!
//! 1. **Resolve** the targets against the catalog and the receipt store.
//!    Resolution errors abort the run before anything is fetched.
//! 2. Work through the plan in waves. A wave is every pending recipe whose
//!    in-plan dependencies are installed or already satisfied; its recipes
//!    run in parallel on a rayon pool of `jobs` threads.
//! 3. Each recipe goes select → fetch → patch/build → install → test, with
//!    the cancellation token checked in between.
//! 4. A failed recipe takes its dependents down with it as `Skipped`;
//!    independent recipes carry on.
//!
//! Satisfied recipes are reported as `AlreadySatisfied` and never touch
//! the fetcher or the build runner.

mod outcome;

pub use outcome::{InstallReport, RecipeOutcome, Stage};

use crate::bottle::{ArtifactChoice, ArtifactSelector, SelectorPolicy};
use crate::cancel::CancellationToken;
use crate::cellar::{Cellar, CommitOptions};
use crate::error::{Error, Result};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::recipe::{Catalog, CookRequest, Kitchen};
use crate::resolver::{PlanAction, PlanStep, ResolutionPlan, ResolveOptions, resolve};
use crate::tester::{TestReport, TestRunner};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options for one install run
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Build from source even where a bottle would do
    pub build_from_source: bool,
    /// Run the test procedure of each requested recipe after installing
    pub run_tests: bool,
    /// Build options and optional dependencies to enable (`--with`)
    pub with: HashSet<String>,
    /// Recommended dependencies to leave out (`--without`)
    pub without: HashSet<String>,
    /// Recipes processed in parallel
    pub jobs: usize,
    /// Resolve only
    pub dry_run: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            build_from_source: false,
            run_tests: false,
            with: HashSet::new(),
            without: HashSet::new(),
            jobs: 1,
            dry_run: false,
        }
    }
}

impl InstallOptions {
    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            include_test: self.run_tests,
            with_optional: self.with.clone(),
            without_recommended: self.without.clone(),
            build_options: self.with.clone(),
        }
    }
}

/// Drives Resolver, Selector, Kitchen, Cellar and Tester over a plan
pub struct Orchestrator {
    catalog: Arc<Catalog>,
    kitchen: Kitchen,
    cellar: Cellar,
    tester: TestRunner,
    policy: SelectorPolicy,
    progress: Arc<dyn ProgressTracker>,
}

/// Per-run state shared by the workers
struct RunContext<'a> {
    selector: ArtifactSelector,
    options: &'a InstallOptions,
    /// Everything in the plan or installed, for `dependency` predicates
    present: HashSet<String>,
    cancel: &'a CancellationToken,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        kitchen: Kitchen,
        cellar: Cellar,
        tester: TestRunner,
        policy: SelectorPolicy,
    ) -> Self {
        Self {
            catalog,
            kitchen,
            cellar,
            tester,
            policy,
            progress: Arc::new(SilentProgress::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cellar(&self) -> &Cellar {
        &self.cellar
    }

    fn selector(&self, options: &InstallOptions) -> ArtifactSelector {
        let mut policy = self.policy.clone();
        policy.force_source |= options.build_from_source;
        ArtifactSelector::new(self.kitchen.platform().clone(), policy)
    }

    /// Resolve `targets` against the installed receipts
    pub fn plan(&self, targets: &[String], options: &InstallOptions) -> Result<ResolutionPlan> {
        let receipts = self.cellar.store().list()?;
        resolve(
            &self.catalog,
            targets,
            self.kitchen.platform(),
            &receipts,
            &options.resolve_options(),
        )
    }

    /// Install `targets` and everything they need
    ///
    /// Returns `Err` only when resolution fails or the run cannot start;
    /// per-recipe failures are reported in the [`InstallReport`].
    pub fn install(
        &self,
        targets: &[String],
        options: &InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<InstallReport> {
        let receipts = self.cellar.store().list()?;
        let plan = resolve(
            &self.catalog,
            targets,
            self.kitchen.platform(),
            &receipts,
            &options.resolve_options(),
        )?;
        info!(
            "Resolved {} recipe(s), {} to install",
            plan.len(),
            plan.pending().count()
        );

        if options.dry_run {
            return Ok(InstallReport {
                plan,
                outcomes: Vec::new(),
            });
        }

        let mut present: HashSet<String> = plan.names().map(str::to_string).collect();
        present.extend(receipts.into_iter().map(|r| r.name));
        let ctx = RunContext {
            selector: self.selector(options),
            options,
            present,
            cancel,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to start worker pool: {}", e)))?;

        self.progress.set_length(plan.pending().count() as u64);
        let mut done: HashMap<String, RecipeOutcome> = HashMap::new();
        for step in &plan.steps {
            if let PlanAction::Satisfied { version } = &step.action {
                debug!("{} is already satisfied", step.recipe);
                done.insert(
                    step.recipe.clone(),
                    RecipeOutcome::AlreadySatisfied {
                        version: version.clone(),
                    },
                );
            }
        }

        loop {
            let ready = self.next_wave(&plan, &mut done, cancel);
            if ready.is_empty() {
                break;
            }
            debug!(
                "Dispatching {}",
                ready.iter().map(|s| s.recipe.as_str()).collect::<Vec<_>>().join(", ")
            );

            let finished: Vec<(String, RecipeOutcome)> = pool.install(|| {
                ready
                    .par_iter()
                    .map(|step| (step.recipe.clone(), self.run_step(step, &ctx)))
                    .collect()
            });
            for (name, outcome) in finished {
                match &outcome {
                    RecipeOutcome::Failed { stage, error } => {
                        warn!("{} failed at {}: {}", name, stage, error)
                    }
                    other => info!("{}: {}", name, other),
                }
                self.progress.increment(1);
                done.insert(name, outcome);
            }
        }

        let mut outcomes = Vec::with_capacity(plan.len());
        for step in &plan.steps {
            let outcome = done.remove(&step.recipe).unwrap_or(RecipeOutcome::Cancelled);
            outcomes.push((step.recipe.clone(), outcome));
        }
        let report = InstallReport { plan, outcomes };

        let failed = report.failures().count();
        if failed == 0 {
            self.progress.finish_with_message("All recipes installed");
        } else {
            self.progress
                .finish_with_error(&format!("{} recipe(s) did not install cleanly", failed));
        }
        Ok(report)
    }

    /// Pending steps whose dependencies are all available
    ///
    /// Steps blocked by a failure, and every step once the run is
    /// cancelled, are settled here so they are never dispatched. The plan
    /// is in dependency order, so a single pass sees each blocker before
    /// the steps it blocks.
    fn next_wave<'p>(
        &self,
        plan: &'p ResolutionPlan,
        done: &mut HashMap<String, RecipeOutcome>,
        cancel: &CancellationToken,
    ) -> Vec<&'p PlanStep> {
        let mut ready = Vec::new();
        for step in plan.pending() {
            if done.contains_key(&step.recipe) {
                continue;
            }
            if cancel.is_cancelled() {
                done.insert(step.recipe.clone(), RecipeOutcome::Cancelled);
                self.progress.increment(1);
                continue;
            }

            let blocker = step.dependencies.iter().find_map(|dep| match done.get(dep) {
                Some(RecipeOutcome::Skipped { blocked_by }) => Some(Ok(blocked_by.clone())),
                Some(RecipeOutcome::Cancelled) => Some(Err(())),
                Some(o) if !o.is_available() => Some(Ok(dep.clone())),
                _ => None,
            });
            match blocker {
                Some(Ok(blocked_by)) => {
                    info!("Skipping {}: {} did not install", step.recipe, blocked_by);
                    done.insert(step.recipe.clone(), RecipeOutcome::Skipped { blocked_by });
                    self.progress.increment(1);
                }
                Some(Err(())) => {
                    done.insert(step.recipe.clone(), RecipeOutcome::Cancelled);
                    self.progress.increment(1);
                }
                None => {
                    if step
                        .dependencies
                        .iter()
                        .all(|dep| done.get(dep).is_some_and(RecipeOutcome::is_available))
                    {
                        ready.push(step);
                    }
                }
            }
        }
        ready
    }

    /// Select, fetch, build, commit and (for requested recipes) test one step
    fn run_step(&self, step: &PlanStep, ctx: &RunContext<'_>) -> RecipeOutcome {
        let name = step.recipe.as_str();
        let fail = |stage: Stage, error: Error| match error {
            Error::Cancelled => RecipeOutcome::Cancelled,
            error => RecipeOutcome::Failed {
                stage: Stage::of_error(stage, &error),
                error,
            },
        };
        let recipe = match self.catalog.require(name) {
            Ok(recipe) => recipe,
            Err(e) => return fail(Stage::Resolve, e),
        };
        if ctx.cancel.is_cancelled() {
            return RecipeOutcome::Cancelled;
        }

        self.progress.set_message(&format!("{}: {}", name, Stage::Select));
        let choice = match ctx.selector.select(recipe) {
            Ok(choice) => choice,
            Err(e) => return fail(Stage::Select, e),
        };
        match &choice {
            ArtifactChoice::UseBottle(bottle) => info!("{}: using bottle {}", name, bottle.tag),
            ArtifactChoice::BuildFromSource { .. } => {
                // Nothing is downloaded for a build that cannot succeed
                if let Err(e) = self.kitchen.check_compiler(recipe) {
                    return fail(Stage::Build, e);
                }
            }
        }

        self.progress.set_message(&format!("{}: {}", name, Stage::Fetch));
        if let Err(e) = self.kitchen.fetch(recipe, &choice, ctx.cancel) {
            return fail(Stage::Fetch, e);
        }

        self.progress.set_message(&format!("{}: {}", name, Stage::Build));
        let request = CookRequest {
            recipe,
            options: &ctx.options.with,
            dependencies: &ctx.present,
            cancel: ctx.cancel,
        };
        let artifact = match self.kitchen.prepare(&request, &choice) {
            Ok(artifact) => artifact,
            Err(e) => return fail(Stage::Build, e),
        };
        for warning in &artifact.warnings {
            warn!("{}: {}", name, warning);
        }

        self.progress.set_message(&format!("{}: {}", name, Stage::Install));
        let commit = CommitOptions {
            installed_on_request: step.requested,
            runtime_dependencies: step.runtime_dependencies.clone(),
        };
        let receipt = match self.cellar.commit(artifact, &commit, ctx.cancel) {
            Ok(receipt) => receipt,
            Err(e) => return fail(Stage::Install, e),
        };

        let test = if ctx.options.run_tests && step.requested {
            self.progress.set_message(&format!("{}: {}", name, Stage::Test));
            Some(
                self.tester
                    .run(recipe, &receipt, ctx.cancel)
                    .unwrap_or_else(|e| TestReport::errored(name, &e)),
            )
        } else {
            None
        };

        RecipeOutcome::Installed {
            version: receipt.pkg_version(),
            source: receipt.source,
            test,
        }
    }

    /// Download and verify what installing `targets` would need, without
    /// building; dependencies are not followed
    pub fn fetch(
        &self,
        targets: &[String],
        options: &InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Vec<PathBuf>)>> {
        let selector = self.selector(options);
        let mut fetched = Vec::with_capacity(targets.len());
        for name in targets {
            let recipe = self.catalog.require(name)?;
            let choice = selector.select(recipe)?;
            let paths = self.kitchen.fetch(recipe, &choice, cancel)?;
            fetched.push((name.clone(), paths));
        }
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ReceiptStore, SqliteReceiptStore};
    use crate::exec::{CommandOutput, CommandRunner};
    use crate::fetch::{FetchError, Fetcher, RetryPolicy};
    use crate::hash::sha256_hex;
    use crate::layout::PrefixLayout;
    use crate::platform::{Arch, PlatformDescriptor};
    use crate::recipe::{KitchenConfig, Recipe, parse_recipe};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves script bodies by URL, counting requests
    struct Scripts {
        files: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl Fetcher for Scripts {
        fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.files.get(url).cloned().ok_or_else(|| FetchError::Permanent {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            })
        }
    }

    struct NoCommands;

    impl CommandRunner for NoCommands {
        fn run(&self, command: &str, _env: &[(String, String)], _workdir: &Path) -> Result<CommandOutput> {
            panic!("unexpected command: {}", command);
        }
    }

    fn body(name: &str) -> Vec<u8> {
        format!("#!/bin/sh\necho {}\n", name).into_bytes()
    }

    /// A recipe whose single source file is installed into bin
    fn recipe(name: &str, sha256: &str, deps: &[&str]) -> Recipe {
        let deps: String = deps
            .iter()
            .map(|d| format!("[[dependencies]]\nname = \"{}\"\n\n", d))
            .collect();
        parse_recipe(&format!(
            r#"
[package]
name = "{name}"
version = "1.0"

[source]
url = "https://example.com/{name}.sh"
sha256 = "{sha256}"

{deps}
[[install]]
step = "install"
from = ["{name}.sh"]
into = "%(bin)s"
"#
        ))
        .unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        fetcher: Arc<Scripts>,
        orchestrator: Orchestrator,
    }

    /// `broken` recipes are served content that does not match their checksum
    fn fixture(recipes: &[(&str, &[&str])], broken: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut files = HashMap::new();
        let mut catalog = Catalog::new();
        for (name, deps) in recipes {
            let content = body(name);
            catalog.insert(recipe(name, &sha256_hex(&content), deps));
            let served = if broken.contains(name) {
                b"tampered".to_vec()
            } else {
                content
            };
            files.insert(format!("https://example.com/{}.sh", name), served);
        }

        let fetcher = Arc::new(Scripts {
            files,
            requests: Mutex::new(Vec::new()),
        });
        let layout = PrefixLayout::new(dir.path().join("prefix"));
        let platform = PlatformDescriptor::linux(Arch::X86_64);
        let config = KitchenConfig {
            source_cache: dir.path().join("cache"),
            jobs: 1,
            retry: RetryPolicy::immediate(1),
        };
        let kitchen = Kitchen::new(
            config,
            layout.clone(),
            platform,
            fetcher.clone(),
            Arc::new(NoCommands),
        );
        let store: Arc<dyn ReceiptStore> = Arc::new(SqliteReceiptStore::in_memory().unwrap());
        let cellar = Cellar::new(layout.clone(), store);
        let tester = TestRunner::new(layout.clone(), Arc::new(NoCommands));
        let policy = SelectorPolicy {
            allow_bottles: true,
            force_source: false,
            local_cellar: layout.cellar().to_string_lossy().to_string(),
            root_url: "https://bottles.example.com".to_string(),
        };

        Fixture {
            _dir: dir,
            fetcher,
            orchestrator: Orchestrator::new(Arc::new(catalog), kitchen, cellar, tester, policy),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_installs_in_dependency_order() {
        let fx = fixture(&[("app", &["lib"]), ("lib", &[])], &[]);
        let options = InstallOptions {
            jobs: 2,
            ..Default::default()
        };
        let report = fx
            .orchestrator
            .install(&names(&["app"]), &options, &CancellationToken::new())
            .unwrap();

        assert!(report.is_success(), "{:?}", report);
        assert_eq!(report.installed().collect::<Vec<_>>(), vec!["lib", "app"]);

        let store = fx.orchestrator.cellar().store();
        let app = store.get("app").unwrap().unwrap();
        assert!(app.installed_on_request);
        assert_eq!(app.runtime_dependencies, vec!["lib"]);
        assert!(!store.get("lib").unwrap().unwrap().installed_on_request);
        assert!(app.keg_path.join("bin/app.sh").is_file());
    }

    #[test]
    fn test_second_run_is_a_noop() {
        let fx = fixture(&[("app", &["lib"]), ("lib", &[])], &[]);
        let cancel = CancellationToken::new();
        fx.orchestrator
            .install(&names(&["app"]), &InstallOptions::default(), &cancel)
            .unwrap();
        let fetched = fx.fetcher.requests.lock().unwrap().len();

        let report = fx
            .orchestrator
            .install(&names(&["app"]), &InstallOptions::default(), &cancel)
            .unwrap();
        assert!(report.plan.is_noop());
        assert!(matches!(
            report.outcome("app"),
            Some(RecipeOutcome::AlreadySatisfied { .. })
        ));
        assert_eq!(fx.fetcher.requests.lock().unwrap().len(), fetched);
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let fx = fixture(
            &[("app", &["lib"]), ("lib", &["base"]), ("base", &[]), ("other", &[])],
            &["base"],
        );
        let report = fx
            .orchestrator
            .install(&names(&["app", "other"]), &InstallOptions::default(), &CancellationToken::new())
            .unwrap();

        assert!(!report.is_success());
        assert!(matches!(
            report.outcome("base"),
            Some(RecipeOutcome::Failed {
                stage: Stage::Fetch,
                error: Error::ChecksumMismatch { .. }
            })
        ));
        for name in ["lib", "app"] {
            match report.outcome(name) {
                Some(RecipeOutcome::Skipped { blocked_by }) => assert_eq!(blocked_by, "base"),
                other => panic!("{}: unexpected {:?}", name, other),
            }
        }
        assert!(matches!(report.outcome("other"), Some(RecipeOutcome::Installed { .. })));

        let store = fx.orchestrator.cellar().store();
        assert!(store.get("base").unwrap().is_none());
        assert!(store.get("app").unwrap().is_none());
        // Dependents were never attempted
        let requests = fx.fetcher.requests.lock().unwrap();
        assert!(!requests.iter().any(|u| u.ends_with("/lib.sh") || u.ends_with("/app.sh")));
    }

    #[test]
    fn test_cancelled_run_installs_nothing() {
        let fx = fixture(&[("app", &[])], &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = fx
            .orchestrator
            .install(&names(&["app"]), &InstallOptions::default(), &cancel)
            .unwrap();
        assert!(matches!(report.outcome("app"), Some(RecipeOutcome::Cancelled)));
        assert!(fx.orchestrator.cellar().store().list().unwrap().is_empty());
        assert!(fx.fetcher.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dry_run_and_resolution_errors() {
        let fx = fixture(&[("app", &["ghost"])], &[]);
        let err = fx
            .orchestrator
            .install(&names(&["app"]), &InstallOptions::default(), &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_resolution_error());

        let fx = fixture(&[("app", &[])], &[]);
        let options = InstallOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = fx
            .orchestrator
            .install(&names(&["app"]), &options, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.plan.names().collect::<Vec<_>>(), vec!["app"]);
        assert!(report.outcomes.is_empty());
        assert!(fx.fetcher.requests.lock().unwrap().is_empty());
    }
}
