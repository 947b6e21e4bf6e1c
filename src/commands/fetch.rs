// src/commands/fetch.rs
//! Fetch command

use super::Session;
use anyhow::{Context, Result};
use keg::cancel::CancellationToken;
use keg::orchestrator::InstallOptions;

pub fn cmd_fetch(session: &Session, names: &[String], build_from_source: bool) -> Result<()> {
    let orchestrator = session.orchestrator(session.catalog()?)?;
    let options = InstallOptions {
        build_from_source,
        ..Default::default()
    };
    let fetched = orchestrator
        .fetch(names, &options, &CancellationToken::new())
        .context("Fetch failed")?;

    for (name, paths) in fetched {
        println!("{}:", name);
        for path in paths {
            println!("  {}", path.display());
        }
    }
    Ok(())
}
