// src/commands/remove.rs
//! Uninstall command

use super::Session;
use anyhow::{Context, Result};
use keg::cellar::Cellar;

pub fn cmd_uninstall(session: &Session, name: &str, ignore_dependents: bool) -> Result<()> {
    let cellar = Cellar::new(session.layout.clone(), session.store()?);
    let receipt = cellar
        .uninstall(name, ignore_dependents)
        .with_context(|| format!("Failed to uninstall {}", name))?;
    println!(
        "Uninstalled {} {} ({} files)",
        receipt.name,
        receipt.pkg_version(),
        receipt.files.len()
    );
    Ok(())
}
