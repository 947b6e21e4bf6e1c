// src/cellar/lock.rs

//! Prefix commit lock
//!
//! Two layers: an in-process mutex so install workers queue up without
//! spinning on the file lock, and an `fs2` exclusive lock on
//! `<prefix>/var/keg/commit.lock` against other keg processes.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts before giving up on the file lock
const MAX_RETRIES: u32 = 8;

#[derive(Debug)]
pub(super) struct CommitLock {
    path: PathBuf,
    local: Mutex<()>,
}

/// Held for the duration of one commit; releases both layers on drop
pub(super) struct CommitGuard<'a> {
    file: File,
    _local: MutexGuard<'a, ()>,
}

impl CommitLock {
    pub(super) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            local: Mutex::new(()),
        }
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn acquire(&self) -> Result<CommitGuard<'_>> {
        let local = self
            .local
            .lock()
            .map_err(|_| Error::IoError("commit lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        // Tries: 0ms, 100ms, 200ms, ... (about 25s in total)
        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    debug!("Commit lock busy (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                    }
                }
            }
        }

        if let Some(e) = last_error {
            return Err(Error::IoError(format!(
                "Failed to acquire commit lock {} after {} retries. \
                 Another keg process may be installing into this prefix. Error: {}",
                self.path.display(),
                MAX_RETRIES,
                e
            )));
        }

        Ok(CommitGuard {
            file,
            _local: local,
        })
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release commit lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_guard_serialises_threads() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(CommitLock::new(dir.path().join("var/keg/commit.lock")));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    let _guard = lock.acquire().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(lock.path().exists());
    }
}
