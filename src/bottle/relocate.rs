// src/bottle/relocate.rs

//! Path relocation for poured bottles and staged source builds

use crate::error::{Error, Result};
use crate::filesystem::symlink;
use crate::layout::{CELLAR_PLACEHOLDER, PREFIX_PLACEHOLDER};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Bytes sniffed to tell text from binary
const SNIFF_LEN: usize = 8192;

/// A file is treated as text when its first bytes contain no NUL
pub fn is_text_file(path: &Path) -> Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut buf = [0u8; SNIFF_LEN];
    let n = file.read(&mut buf)?;
    Ok(!buf[..n].contains(&0))
}

/// Rewrite prefix and cellar placeholders in every text file under `root`
///
/// Symlinks are not followed. Returns the number of files rewritten.
pub fn relocate_placeholders(root: &Path, prefix: &Path, cellar: &Path) -> Result<usize> {
    let cellar = cellar.to_string_lossy();
    let prefix = prefix.to_string_lossy();
    rewrite_text_files(root, &[(CELLAR_PLACEHOLDER, &cellar), (PREFIX_PLACEHOLDER, &prefix)])
}

/// Point a keg built against a staging prefix back at the live prefix
///
/// Text files mentioning `staged` are rewritten to mention `live`, and
/// absolute symlinks into `staged` are re-pointed. Returns the number of
/// entries changed.
pub fn relocate_staged(root: &Path, staged: &Path, live: &Path) -> Result<usize> {
    let mut changed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        if !entry.file_type().is_symlink() {
            continue;
        }
        let target = fs::read_link(entry.path())?;
        let Ok(rel) = target.strip_prefix(staged) else {
            continue;
        };
        fs::remove_file(entry.path())?;
        symlink(&live.join(rel), entry.path())?;
        debug!("Re-linked {}", entry.path().display());
        changed += 1;
    }

    let staged = staged.to_string_lossy();
    let live = live.to_string_lossy();
    changed += rewrite_text_files(root, &[(&staged, &live)])?;
    Ok(changed)
}

/// Apply `(from, to)` replacements, in order, to every UTF-8 text file
/// under `root` that contains any `from`
fn rewrite_text_files(root: &Path, replacements: &[(&str, &str)]) -> Result<usize> {
    let mut rewritten = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        if !entry.file_type().is_file() || !is_text_file(entry.path())? {
            continue;
        }

        let Ok(content) = fs::read_to_string(entry.path()) else {
            // Not UTF-8; nothing we can safely rewrite
            continue;
        };
        if !replacements.iter().any(|(from, _)| content.contains(from)) {
            continue;
        }

        let relocated = replacements
            .iter()
            .fold(content, |text, (from, to)| text.replace(from, to));
        fs::write(entry.path(), relocated)?;
        debug!("Relocated {}", entry.path().display());
        rewritten += 1;
    }

    Ok(rewritten)
}
