// src/cellar/mod.rs

//! Cellar: atomic commit of staged kegs into the prefix
//!
//! A commit runs in two halves:
//!
//! 1. **Place** (no lock): copy the staged keg into a hidden sibling
//!    `Cellar/<name>/.<version>.incoming-<uuid>`, recording every file.
//!    Any failure removes the incoming directory, so the prefix never holds
//!    a half-placed keg.
//! 2. **Commit** (under the commit lock): move an existing keg of the same
//!    version aside, rename incoming into place, write
//!    `INSTALL_RECEIPT.json`, point `opt/<name>` at the new keg and record
//!    the receipt in the store. A failure anywhere in this half restores
//!    the previous keg and link.
//!
//! Superseded kegs are deleted after the lock is released.

mod lock;
mod place;

pub use place::{CopyPlacer, Placer};

use crate::cancel::CancellationToken;
use crate::db::{InstallReceipt, RECEIPT_FILE, ReceiptStore};
use crate::error::{Error, Result};
use crate::filesystem::{is_empty_dir, symlink};
use crate::layout::PrefixLayout;
use crate::recipe::BuildArtifact;
use chrono::Utc;
use lock::CommitLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Receipt fields the artifact itself does not know
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Named on the command line rather than pulled in as a dependency
    pub installed_on_request: bool,
    pub runtime_dependencies: Vec<String>,
}

/// The installer
pub struct Cellar {
    layout: PrefixLayout,
    store: Arc<dyn ReceiptStore>,
    placer: Arc<dyn Placer>,
    lock: CommitLock,
}

impl Cellar {
    pub fn new(layout: PrefixLayout, store: Arc<dyn ReceiptStore>) -> Self {
        let lock = CommitLock::new(layout.lock_path());
        Self {
            layout,
            store,
            placer: Arc::new(CopyPlacer),
            lock,
        }
    }

    /// Replace the file placer (tests use this to inject failures)
    pub fn with_placer(mut self, placer: Arc<dyn Placer>) -> Self {
        self.placer = placer;
        self
    }

    pub fn layout(&self) -> &PrefixLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn ReceiptStore> {
        &self.store
    }

    /// Commit a staged keg and record its receipt
    ///
    /// Consumes the artifact; its temporary tree is deleted when this
    /// returns, whatever the outcome.
    pub fn commit(
        &self,
        artifact: BuildArtifact,
        options: &CommitOptions,
        cancel: &CancellationToken,
    ) -> Result<InstallReceipt> {
        let name = artifact.name.clone();
        let keg = artifact.keg_path.clone();
        let rack = keg
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.rack(&name));
        fs::create_dir_all(&rack)?;

        let incoming = rack.join(format!(".{}.incoming-{}", artifact.pkg_version, Uuid::new_v4()));
        info!("Placing {} {} into {}", name, artifact.pkg_version, keg.display());

        let files = match self.place(artifact.staged_keg(), &incoming) {
            Ok(files) => files,
            Err((placed, e)) => {
                remove_dir_quietly(&incoming);
                remove_rack_if_empty(&rack);
                return Err(Error::PartialInstallFailure {
                    recipe: name,
                    placed,
                    reason: e.to_string(),
                });
            }
        };

        if let Err(e) = cancel.check() {
            remove_dir_quietly(&incoming);
            remove_rack_if_empty(&rack);
            return Err(e);
        }

        let receipt = InstallReceipt {
            name: name.clone(),
            version: artifact.pkg_version.version.clone(),
            revision: artifact.pkg_version.revision,
            source: artifact.source.clone(),
            installed_at: Utc::now(),
            installed_on_request: options.installed_on_request,
            runtime_dependencies: options.runtime_dependencies.clone(),
            keg_path: keg.clone(),
            files,
        };

        let superseded = {
            let _guard = self.lock.acquire()?;
            debug!("Acquired commit lock for {}", name);
            match self.commit_locked(&receipt, &incoming, &rack) {
                Ok(superseded) => superseded,
                Err(e) => {
                    remove_dir_quietly(&incoming);
                    remove_rack_if_empty(&rack);
                    return Err(e);
                }
            }
        };

        for dir in superseded {
            debug!("Removing superseded keg {}", dir.display());
            remove_dir_quietly(&dir);
        }

        for warning in &artifact.warnings {
            warn!("{}: {}", name, warning);
        }
        info!("Installed {} {} ({} files)", name, artifact.pkg_version, receipt.files.len());
        Ok(receipt)
    }

    /// Copy the staged tree into `incoming`; on error report how many
    /// files made it
    fn place(&self, staged: &Path, incoming: &Path) -> std::result::Result<Vec<PathBuf>, (usize, Error)> {
        let mut files = Vec::new();
        let result = (|| -> Result<()> {
            fs::create_dir_all(incoming)?;
            for entry in WalkDir::new(staged).follow_links(false).min_depth(1).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
                let rel = entry
                    .path()
                    .strip_prefix(staged)
                    .map_err(|e| Error::IoError(e.to_string()))?;
                let target = incoming.join(rel);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&target)?;
                    continue;
                }
                self.placer.place(entry.path(), &target)?;
                files.push(rel.to_path_buf());
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(files),
            Err(e) => Err((files.len(), e)),
        }
    }

    /// The locked half of a commit; returns directories to delete once the
    /// lock is released
    fn commit_locked(
        &self,
        receipt: &InstallReceipt,
        incoming: &Path,
        rack: &Path,
    ) -> Result<Vec<PathBuf>> {
        let keg = &receipt.keg_path;
        let previous = self.store.get(&receipt.name)?;

        let backup = if keg.symlink_metadata().is_ok() {
            let backup = rack.join(format!(
                ".{}.previous-{}",
                keg.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                Uuid::new_v4()
            ));
            fs::rename(keg, &backup)?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(incoming, keg) {
            if let Some(backup) = &backup {
                restore(backup, keg);
            }
            return Err(e.into());
        }

        let opt = self.layout.opt_path(&receipt.name);
        let previous_link = fs::read_link(&opt).ok();

        if let Err(e) = self.finish(receipt, &opt) {
            warn!("Commit of {} failed, rolling back: {}", receipt.name, e);
            remove_dir_quietly(keg);
            if let Some(backup) = &backup {
                restore(backup, keg);
            }
            match &previous_link {
                Some(target) => {
                    if let Err(e) = replace_symlink(target, &opt) {
                        warn!("Failed to restore {}: {}", opt.display(), e);
                    }
                }
                None => {
                    let _ = fs::remove_file(&opt);
                }
            }
            return Err(e);
        }

        let mut superseded: Vec<PathBuf> = backup.into_iter().collect();
        if let Some(previous) = previous
            && previous.keg_path != *keg
            && previous.keg_path.starts_with(self.layout.cellar())
        {
            superseded.push(previous.keg_path);
        }
        Ok(superseded)
    }

    fn finish(&self, receipt: &InstallReceipt, opt: &Path) -> Result<()> {
        fs::write(receipt.keg_path.join(RECEIPT_FILE), receipt.to_json()?)?;

        let target = Path::new("..")
            .join("Cellar")
            .join(&receipt.name)
            .join(receipt.pkg_version().to_string());
        replace_symlink(&target, opt)?;

        self.store.put(receipt)
    }

    /// Remove an installed recipe: keg, opt link and receipt
    ///
    /// Refuses while other installed recipes depend on it, unless
    /// `ignore_dependents` is set.
    pub fn uninstall(&self, name: &str, ignore_dependents: bool) -> Result<InstallReceipt> {
        let _guard = self.lock.acquire()?;
        let receipt = self
            .store
            .get(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        if !ignore_dependents {
            let dependents = self.store.dependents(name)?;
            if !dependents.is_empty() {
                return Err(Error::HasDependents {
                    name: name.to_string(),
                    dependents,
                });
            }
        }

        info!("Uninstalling {} {}", name, receipt.pkg_version());
        let opt = self.layout.opt_path(name);
        if opt.symlink_metadata().is_ok() {
            fs::remove_file(&opt)?;
        }
        if receipt.keg_path.starts_with(self.layout.cellar()) && receipt.keg_path.exists() {
            fs::remove_dir_all(&receipt.keg_path)?;
        }
        remove_rack_if_empty(&self.layout.rack(name));
        self.store.remove(name)?;
        Ok(receipt)
    }
}

/// Point `link` at `target`, replacing whatever is there atomically
fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    let parent = link
        .parent()
        .ok_or_else(|| Error::InvalidPath(link.display().to_string()))?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".link-{}", Uuid::new_v4()));
    symlink(target, &tmp)?;
    if let Err(e) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn restore(backup: &Path, keg: &Path) {
    if let Err(e) = fs::rename(backup, keg) {
        warn!(
            "Failed to restore previous keg {} from {}: {}",
            keg.display(),
            backup.display(),
            e
        );
    }
}

fn remove_dir_quietly(dir: &Path) {
    if dir.symlink_metadata().is_ok()
        && let Err(e) = fs::remove_dir_all(dir)
    {
        warn!("Failed to remove {}: {}", dir.display(), e);
    }
}

fn remove_rack_if_empty(rack: &Path) {
    if rack.is_dir() && is_empty_dir(rack).unwrap_or(false) {
        let _ = fs::remove_dir(rack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteReceiptStore;
    use crate::recipe::ArtifactSource;
    use crate::version::PkgVersion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Cellar) {
        let prefix = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteReceiptStore::in_memory().unwrap());
        let cellar = Cellar::new(PrefixLayout::new(prefix.path()), store);
        (prefix, cellar)
    }

    fn artifact(cellar: &Cellar, name: &str, version: &str, marker: &str) -> BuildArtifact {
        let build_dir = tempfile::tempdir().unwrap();
        let staged = build_dir.path().join("keg");
        fs::create_dir_all(staged.join("bin")).unwrap();
        fs::create_dir_all(staged.join("share/doc")).unwrap();
        fs::write(staged.join("bin").join(name), marker).unwrap();
        fs::write(staged.join("share/doc/README"), "docs").unwrap();
        let pkg_version = PkgVersion::parse(version).unwrap();
        let keg_path = cellar.layout().keg_path(name, &pkg_version);
        BuildArtifact::new(name, pkg_version, keg_path, ArtifactSource::Source, build_dir, staged)
    }

    struct FailAfter {
        allowed: usize,
        seen: AtomicUsize,
    }

    impl Placer for FailAfter {
        fn place(&self, source: &Path, target: &Path) -> Result<()> {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(Error::IoError("disk full".to_string()));
            }
            CopyPlacer.place(source, target)
        }
    }

    #[test]
    fn test_commit_places_keg_receipt_and_link() {
        let (prefix, cellar) = setup();
        let receipt = cellar
            .commit(
                artifact(&cellar, "luau", "0.578", "v1"),
                &CommitOptions {
                    installed_on_request: true,
                    runtime_dependencies: vec![],
                },
                &CancellationToken::new(),
            )
            .unwrap();

        let keg = prefix.path().join("Cellar/luau/0.578");
        assert_eq!(receipt.keg_path, keg);
        assert_eq!(
            receipt.files,
            vec![PathBuf::from("bin/luau"), PathBuf::from("share/doc/README")]
        );
        assert_eq!(fs::read_to_string(keg.join("bin/luau")).unwrap(), "v1");

        let on_disk = InstallReceipt::from_json(&fs::read_to_string(keg.join(RECEIPT_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk, receipt);
        assert_eq!(cellar.store().get("luau").unwrap(), Some(receipt));

        let opt = prefix.path().join("opt/luau");
        assert_eq!(fs::read_link(&opt).unwrap(), Path::new("../Cellar/luau/0.578"));
        assert_eq!(fs::read_to_string(opt.join("bin/luau")).unwrap(), "v1");

        // Nothing hidden left behind in the rack
        let rack: Vec<_> = fs::read_dir(prefix.path().join("Cellar/luau")).unwrap().collect();
        assert_eq!(rack.len(), 1);
    }

    #[test]
    fn test_failed_placement_leaves_nothing() {
        let (prefix, cellar) = setup();
        let cellar = cellar.with_placer(Arc::new(FailAfter {
            allowed: 1,
            seen: AtomicUsize::new(0),
        }));

        let err = cellar
            .commit(
                artifact(&cellar, "luau", "0.578", "v1"),
                &CommitOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();

        match err {
            Error::PartialInstallFailure { recipe, placed, .. } => {
                assert_eq!(recipe, "luau");
                assert_eq!(placed, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!prefix.path().join("Cellar/luau").exists());
        assert!(!prefix.path().join("opt/luau").exists());
        assert!(cellar.store().get("luau").unwrap().is_none());
    }

    #[test]
    fn test_cancel_before_commit_leaves_no_receipt() {
        let (prefix, cellar) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cellar
            .commit(artifact(&cellar, "luau", "0.578", "v1"), &CommitOptions::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!prefix.path().join("Cellar/luau").exists());
        assert!(cellar.store().list().unwrap().is_empty());
    }

    #[test]
    fn test_reinstall_same_version_replaces_keg() {
        let (prefix, cellar) = setup();
        let cancel = CancellationToken::new();
        cellar
            .commit(artifact(&cellar, "luau", "0.578", "v1"), &CommitOptions::default(), &cancel)
            .unwrap();
        cellar
            .commit(artifact(&cellar, "luau", "0.578", "v2"), &CommitOptions::default(), &cancel)
            .unwrap();

        let keg = prefix.path().join("Cellar/luau/0.578");
        assert_eq!(fs::read_to_string(keg.join("bin/luau")).unwrap(), "v2");
        let rack: Vec<_> = fs::read_dir(prefix.path().join("Cellar/luau")).unwrap().collect();
        assert_eq!(rack.len(), 1);
    }

    #[test]
    fn test_upgrade_removes_old_keg() {
        let (prefix, cellar) = setup();
        let cancel = CancellationToken::new();
        cellar
            .commit(artifact(&cellar, "luau", "0.577", "old"), &CommitOptions::default(), &cancel)
            .unwrap();
        cellar
            .commit(artifact(&cellar, "luau", "0.578", "new"), &CommitOptions::default(), &cancel)
            .unwrap();

        assert!(!prefix.path().join("Cellar/luau/0.577").exists());
        assert_eq!(
            fs::read_to_string(prefix.path().join("opt/luau/bin/luau")).unwrap(),
            "new"
        );
        assert_eq!(
            cellar.store().get("luau").unwrap().unwrap().version.as_str(),
            "0.578"
        );
    }

    #[test]
    fn test_uninstall() {
        let (prefix, cellar) = setup();
        let cancel = CancellationToken::new();
        cellar
            .commit(artifact(&cellar, "jsoncpp", "1.9.5", "j"), &CommitOptions::default(), &cancel)
            .unwrap();
        cellar
            .commit(
                artifact(&cellar, "sysdig", "0.29.3", "s"),
                &CommitOptions {
                    installed_on_request: true,
                    runtime_dependencies: vec!["jsoncpp".into()],
                },
                &cancel,
            )
            .unwrap();

        match cellar.uninstall("jsoncpp", false) {
            Err(Error::HasDependents { name, dependents }) => {
                assert_eq!(name, "jsoncpp");
                assert_eq!(dependents, vec!["sysdig"]);
            }
            other => panic!("expected dependents to block the uninstall, got {:?}", other),
        }
        assert!(prefix.path().join("Cellar/jsoncpp/1.9.5").exists());
        cellar.uninstall("sysdig", false).unwrap();
        cellar.uninstall("jsoncpp", false).unwrap();

        assert!(!prefix.path().join("Cellar/jsoncpp").exists());
        assert!(!prefix.path().join("opt/sysdig").exists());
        assert!(cellar.store().list().unwrap().is_empty());
        assert!(matches!(
            cellar.uninstall("jsoncpp", false),
            Err(Error::NotInstalled(_))
        ));
    }
}
