// src/fetch/mod.rs

//! Resource fetching
//!
//! The [`Fetcher`] trait is the only way keg touches the network, so tests
//! and offline mirrors can swap it out. On top of it sit a bounded retry
//! loop ([`RetryPolicy`]) and a download cache keyed by content hash
//! ([`DownloadCache`]).
//!
//! Only transport failures are retried. A checksum mismatch means the bytes
//! arrived intact but are the wrong bytes, so fetching again cannot help.

mod cache;
mod retry;

pub use cache::DownloadCache;
pub use retry::{RetryPolicy, fetch_with_retry};

pub use crate::hash::{sha256_hex, verify_sha256};

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::debug;

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a single fetch attempt failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Worth retrying: connection reset, timeout, 5xx, 429
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Retrying will not help: 404, bad URL, missing local file
    #[error("failed to fetch {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            FetchError::Transient { reason, .. } | FetchError::Permanent { reason, .. } => reason,
        }
    }
}

/// Fetches the bytes behind a URL
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// `reqwest`-backed fetcher; also understands `file://` URLs
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return std::fs::read(path).map_err(|e| FetchError::Permanent {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        debug!("GET {}", url);
        let response = self.client.get(url).send().map_err(|e| {
            let reason = e.to_string();
            if e.is_builder() {
                FetchError::Permanent {
                    url: url.to_string(),
                    reason,
                }
            } else {
                FetchError::Transient {
                    url: url.to_string(),
                    reason,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {}", status);
            return Err(if is_transient_status(status) {
                FetchError::Transient {
                    url: url.to_string(),
                    reason,
                }
            } else {
                FetchError::Permanent {
                    url: url.to_string(),
                    reason,
                }
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Transient {
                url: url.to_string(),
                reason: format!("Failed to read response: {e}"),
            })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
