// src/commands/install.rs
//! Install command

use super::Session;
use super::progress::InstallProgress;
use anyhow::{Context, Result, bail};
use keg::cancel::CancellationToken;
use keg::orchestrator::{InstallOptions, InstallReport, RecipeOutcome};
use keg::progress::{LogProgress, ProgressTracker};
use keg::resolver::ResolutionPlan;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Flags of `keg install`
#[derive(Debug, Clone, Default)]
pub struct InstallArgs {
    pub names: Vec<String>,
    pub build_from_source: bool,
    pub test: bool,
    pub with: Vec<String>,
    pub without: Vec<String>,
    pub jobs: Option<usize>,
    pub dry_run: bool,
    pub timeout: Option<u64>,
}

pub fn cmd_install(session: &Session, args: InstallArgs) -> Result<()> {
    let catalog = session.catalog()?;
    let options = InstallOptions {
        build_from_source: args.build_from_source,
        run_tests: args.test,
        with: args.with.into_iter().collect(),
        without: args.without.into_iter().collect(),
        jobs: args.jobs.unwrap_or(session.config.jobs),
        dry_run: args.dry_run,
    };

    let mut orchestrator = session.orchestrator(catalog)?;
    if args.dry_run {
        let plan = orchestrator
            .plan(&args.names, &options)
            .context("Failed to resolve dependencies")?;
        print_plan(&plan);
        return Ok(());
    }

    let progress: Arc<dyn ProgressTracker> = if session.quiet {
        Arc::new(LogProgress::new("install"))
    } else {
        Arc::new(InstallProgress::new("Installing"))
    };
    orchestrator = orchestrator.with_progress(progress);

    let cancel = match args.timeout {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };
    info!("Installing {}", args.names.join(", "));
    let report = orchestrator
        .install(&args.names, &options, &cancel)
        .context("Failed to resolve dependencies")?;
    print_report(&report);

    if !report.is_success() {
        let failed: Vec<String> = report
            .failures()
            .map(|(name, outcome)| match outcome {
                RecipeOutcome::Failed { stage, .. } => format!("{} ({})", name, stage),
                RecipeOutcome::Installed { .. } => format!("{} (test)", name),
                _ => name.to_string(),
            })
            .collect();
        bail!("Install did not complete: {}", failed.join(", "));
    }
    Ok(())
}

fn print_plan(plan: &ResolutionPlan) {
    if plan.is_noop() {
        println!("Nothing to do; everything is already installed.");
    }
    for step in &plan.steps {
        let mut line = format!("  {} {}: {}", step.recipe, step.version, step.action);
        if step.build_only {
            line.push_str(" [build]");
        }
        println!("{}", line);
    }
}

fn print_report(report: &InstallReport) {
    for (name, outcome) in &report.outcomes {
        println!("{}: {}", name, outcome);
        if let RecipeOutcome::Installed {
            test: Some(test), ..
        } = outcome
            && let Some(failure) = test.failure()
        {
            println!("  {}", failure);
        }
    }
}
