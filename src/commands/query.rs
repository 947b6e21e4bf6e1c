// src/commands/query.rs
//! Read-only commands: deps and list

use super::Session;
use anyhow::{Context, Result};
use keg::resolver::{ResolveOptions, resolve};

pub fn cmd_deps(
    session: &Session,
    names: &[String],
    include_test: bool,
    with: &[String],
    without: &[String],
    json: bool,
) -> Result<()> {
    let catalog = session.catalog()?;
    let receipts = session.store()?.list()?;
    let options = ResolveOptions {
        include_test,
        with_optional: with.iter().cloned().collect(),
        without_recommended: without.iter().cloned().collect(),
        build_options: with.iter().cloned().collect(),
    };
    let plan = resolve(&catalog, names, &session.platform, &receipts, &options)
        .context("Failed to resolve dependencies")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    for step in &plan.steps {
        let via = if step.requested {
            "requested".to_string()
        } else {
            format!("via {}", step.requested_by.join(", "))
        };
        let build = if step.build_only { ", build only" } else { "" };
        println!("{} {} [{}] ({}{})", step.recipe, step.version, step.action, via, build);
    }
    Ok(())
}

pub fn cmd_list(session: &Session, requested_only: bool) -> Result<()> {
    let receipts = session.store()?.list()?;
    let shown: Vec<_> = receipts
        .iter()
        .filter(|r| !requested_only || r.installed_on_request)
        .collect();
    if shown.is_empty() {
        println!("No recipes installed.");
        return Ok(());
    }
    for receipt in shown {
        println!(
            "{} {} ({}, {})",
            receipt.name,
            receipt.pkg_version(),
            receipt.source,
            receipt.installed_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
