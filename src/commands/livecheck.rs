// src/commands/livecheck.rs
//! Livecheck command

use super::Session;
use anyhow::{Context, Result, bail};
use keg::cancel::CancellationToken;
use keg::livecheck::{Livecheck, LivecheckOutcome, LivecheckResult};
use tracing::warn;

pub fn cmd_livecheck(session: &Session, names: &[String], json: bool) -> Result<()> {
    let catalog = session.catalog()?;
    let engine = Livecheck::new(session.fetcher()?).with_retry(session.config.retry_policy());
    let cancel = CancellationToken::new();

    let recipes = if names.is_empty() {
        catalog
            .names()
            .filter_map(|n| catalog.get(n))
            .filter(|r| r.livecheck.is_some())
            .collect::<Vec<_>>()
    } else {
        names
            .iter()
            .map(|n| catalog.require(n))
            .collect::<keg::Result<Vec<_>>>()?
    };

    let mut found: Vec<LivecheckResult> = Vec::new();
    let mut errors = 0;
    for recipe in recipes {
        match engine.check(recipe, &cancel) {
            Ok(LivecheckOutcome::Found(result)) => {
                if !json {
                    println!("{}", result);
                }
                found.push(result);
            }
            Ok(LivecheckOutcome::NoLivecheck) => {
                if !json {
                    println!("{}: no livecheck block", recipe.name());
                }
            }
            Ok(LivecheckOutcome::NoVersionFound { url }) => {
                warn!("{}: no version found at {}", recipe.name(), url);
                errors += 1;
            }
            Err(e) => {
                warn!("{}: {}", recipe.name(), e);
                errors += 1;
            }
        }
    }

    if json {
        let out = serde_json::to_string_pretty(&found).context("Failed to serialize results")?;
        println!("{}", out);
    }
    if errors > 0 {
        bail!("Livecheck failed for {} recipe(s)", errors);
    }
    Ok(())
}
