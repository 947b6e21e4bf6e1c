// src/livecheck/mod.rs

//! Livecheck: upstream version discovery
//!
//! Strategies:
//! - **page_match**: fetch a page (a literal URL, the stable source URL or
//!   the homepage), apply the recipe's pattern, take the highest version
//! - **github_latest**: ask the GitHub releases API for the latest release
//!   of the repository the URL points at
//!
//! Results are informational only. Nothing here touches the recipe, the
//! prefix or the receipt store.

mod strategy;

pub use strategy::{DEFAULT_TAG_REGEX, github_latest, github_repo, page_match};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, RetryPolicy, fetch_with_retry};
use crate::recipe::{LivecheckStrategy, LivecheckUrl, Recipe};
use crate::version::Version;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, info};

/// GitHub REST API root
pub const GITHUB_API: &str = "https://api.github.com";

/// How the declared version compares with upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LivecheckStatus {
    UpToDate,
    Outdated,
    /// The recipe declares a version upstream has not published (yet)
    NewerThanUpstream,
}

/// A discovered upstream version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivecheckResult {
    pub name: String,
    pub current: Version,
    pub latest: Version,
    pub status: LivecheckStatus,
    pub strategy: LivecheckStrategy,
    /// URL that was checked
    pub url: String,
}

impl fmt::Display for LivecheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            LivecheckStatus::UpToDate => write!(f, "{}: {} (up to date)", self.name, self.current),
            LivecheckStatus::Outdated => {
                write!(f, "{}: {} ==> {}", self.name, self.current, self.latest)
            }
            LivecheckStatus::NewerThanUpstream => write!(
                f,
                "{}: {} (newer than upstream {})",
                self.name, self.current, self.latest
            ),
        }
    }
}

/// Everything a livecheck run can conclude besides a transport failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivecheckOutcome {
    Found(LivecheckResult),
    /// The recipe has no livecheck block
    NoLivecheck,
    /// The page was fetched but nothing in it looked like a version
    NoVersionFound { url: String },
}

/// The livecheck engine
pub struct Livecheck {
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    github_api: String,
}

impl Livecheck {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            retry: RetryPolicy::default(),
            github_api: GITHUB_API.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Point github_latest at another API root (mirrors, tests)
    pub fn with_github_api(mut self, api: impl Into<String>) -> Self {
        self.github_api = api.into().trim_end_matches('/').to_string();
        self
    }

    /// Check one recipe
    pub fn check(&self, recipe: &Recipe, cancel: &CancellationToken) -> Result<LivecheckOutcome> {
        let Some(spec) = &recipe.livecheck else {
            debug!("{} has no livecheck block", recipe.name());
            return Ok(LivecheckOutcome::NoLivecheck);
        };

        let url = match &spec.url {
            LivecheckUrl::Stable => recipe.source_url(),
            LivecheckUrl::Homepage => recipe.package.homepage.clone().ok_or_else(|| {
                Error::LivecheckError(format!("{} livecheck uses the homepage but has none", recipe.name()))
            })?,
            LivecheckUrl::Url(u) => recipe.substitute(u, &HashMap::new()),
        };

        info!("Checking {} ({}, {})", recipe.name(), spec.strategy, url);
        let latest = match spec.strategy {
            LivecheckStrategy::PageMatch => {
                let regex = spec.regex.as_deref().ok_or_else(|| {
                    Error::LivecheckError(format!("{} page_match livecheck needs a regex", recipe.name()))
                })?;
                let body = fetch_with_retry(self.fetcher.as_ref(), &url, &self.retry, cancel)?;
                let text = String::from_utf8_lossy(&body);
                page_match(&text, regex, &spec.exclude)?.into_iter().max()
            }
            LivecheckStrategy::GithubLatest => {
                let (owner, repo) = github_repo(&url)?;
                let api = format!("{}/repos/{}/{}/releases/latest", self.github_api, owner, repo);
                let body = fetch_with_retry(self.fetcher.as_ref(), &api, &self.retry, cancel)?;
                github_latest(&body, spec.regex.as_deref())?
            }
        };

        let Some(latest) = latest else {
            return Ok(LivecheckOutcome::NoVersionFound { url });
        };

        let current = recipe.version().clone();
        let status = match current.cmp(&latest) {
            Ordering::Less => LivecheckStatus::Outdated,
            Ordering::Equal => LivecheckStatus::UpToDate,
            Ordering::Greater => LivecheckStatus::NewerThanUpstream,
        };

        Ok(LivecheckOutcome::Found(LivecheckResult {
            name: recipe.name().to_string(),
            current,
            latest,
            status,
            strategy: spec.strategy,
            url,
        }))
    }
}
