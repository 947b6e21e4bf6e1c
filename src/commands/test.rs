// src/commands/test.rs
//! Test command

use super::Session;
use anyhow::{Context, Result, bail};
use keg::cancel::CancellationToken;

pub fn cmd_test(session: &Session, name: &str) -> Result<()> {
    let catalog = session.catalog()?;
    let recipe = catalog.require(name)?;
    let store = session.store()?;
    let tester = session.tester();

    let report = tester
        .test_installed(recipe, store.as_ref(), &CancellationToken::new())
        .with_context(|| format!("Failed to test {}", name))?;

    for result in &report.results {
        let mark = if result.passed { "ok" } else { "FAILED" };
        println!("  [{}] {}", mark, result.command);
    }
    if let Some(failure) = report.failure() {
        bail!(failure);
    }
    println!("{}: tests passed", name);
    Ok(())
}
