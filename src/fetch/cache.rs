// src/fetch/cache.rs

//! Download cache keyed by content hash

use super::{Fetcher, RetryPolicy, fetch_with_retry, sha256_hex};
use crate::hash::sha256_file;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::recipe::ResourceSpec;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Verified downloads, stored as `<sha256>--<basename>`
///
/// The basename is kept so archive formats can still be recognised by
/// extension after caching.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `resource` lives once cached
    pub fn path_for(&self, resource: &ResourceSpec) -> PathBuf {
        let basename = resource
            .url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|b| !b.is_empty())
            .unwrap_or("download");
        self.dir
            .join(format!("{}--{}", resource.sha256.to_ascii_lowercase(), basename))
    }

    /// True if a cached copy exists (not re-verified)
    pub fn contains(&self, resource: &ResourceSpec) -> bool {
        self.path_for(resource).exists()
    }

    /// Return a verified local copy of `resource`, downloading it if needed
    ///
    /// A cached file that no longer matches its hash is discarded and
    /// downloaded again. A fresh download that does not match is a
    /// `ChecksumMismatch` and is never retried or kept.
    pub fn fetch(
        &self,
        fetcher: &dyn Fetcher,
        resource: &ResourceSpec,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let cached_path = self.path_for(resource);

        if cached_path.exists() {
            debug!("Using cached download: {}", cached_path.display());
            let actual = sha256_file(&cached_path)?;
            if actual.eq_ignore_ascii_case(&resource.sha256) {
                return Ok(cached_path);
            }
            warn!("Cached file checksum mismatch, re-downloading");
            // A concurrent fetch of the same resource may have removed it
            match fs::remove_file(&cached_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        info!("Downloading {}", resource.url);
        let bytes = fetch_with_retry(fetcher, &resource.url, policy, cancel)?;

        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(&resource.sha256) {
            return Err(Error::ChecksumMismatch {
                resource: resource.name.clone(),
                expected: resource.sha256.clone(),
                actual,
            });
        }

        // Unique per download, so fetches of one resource from parallel
        // workers never share a partial file
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&bytes)?;
        temp.persist(&cached_path).map_err(|e| Error::Io(e.error))?;
        Ok(cached_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixed {
        body: Vec<u8>,
        calls: AtomicU32,
    }

    impl Fetcher for Fixed {
        fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn resource(body: &[u8]) -> ResourceSpec {
        ResourceSpec {
            name: "luau".into(),
            url: "https://example.com/dl/luau-0.578.tar.gz?raw=1".into(),
            sha256: sha256_hex(body),
        }
    }

    #[test]
    fn test_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let fetcher = Fixed {
            body: b"archive".to_vec(),
            calls: AtomicU32::new(0),
        };
        let res = resource(b"archive");

        let path = cache
            .fetch(&fetcher, &res, &RetryPolicy::immediate(1), &CancellationToken::new())
            .unwrap();
        assert!(path.to_string_lossy().ends_with("--luau-0.578.tar.gz"));
        assert_eq!(fs::read(&path).unwrap(), b"archive");

        cache
            .fetch(&fetcher, &res, &RetryPolicy::immediate(1), &CancellationToken::new())
            .unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mismatch_is_fatal_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let fetcher = Fixed {
            body: b"tampered".to_vec(),
            calls: AtomicU32::new(0),
        };
        let res = resource(b"archive");

        let err = cache
            .fetch(&fetcher, &res, &RetryPolicy::immediate(3), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&res));
    }

    #[test]
    fn test_corrupt_cache_entry_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let res = resource(b"archive");
        fs::write(cache.path_for(&res), b"garbage").unwrap();

        let fetcher = Fixed {
            body: b"archive".to_vec(),
            calls: AtomicU32::new(0),
        };
        let path = cache
            .fetch(&fetcher, &res, &RetryPolicy::immediate(1), &CancellationToken::new())
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"archive");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parallel_fetches_of_one_resource() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let fetcher = Fixed {
            body: b"archive".to_vec(),
            calls: AtomicU32::new(0),
        };
        let res = resource(b"archive");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let path = cache
                        .fetch(&fetcher, &res, &RetryPolicy::immediate(1), &CancellationToken::new())
                        .unwrap();
                    assert_eq!(fs::read(path).unwrap(), b"archive");
                });
            }
        });

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(cache.contains(&res));
    }
}
