// src/filesystem/tree.rs

//! Directory tree copy and listing

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every regular file and symlink under `root`, relative to it, sorted
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(walk_error)?;
        let ft = entry.file_type();
        if ft.is_file() || ft.is_symlink() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::IoError(e.to_string()))?;
            files.push(rel.to_path_buf());
        }
    }
    Ok(files)
}

/// True if `dir` is missing or has no entries
pub fn is_empty_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Copy the tree at `src` into `dest`, preserving symlinks and modes
///
/// `on_file` is called with the destination path of every file or link
/// after it is placed, so callers can count or record placements.
pub fn copy_tree(src: &Path, dest: &Path, mut on_file: impl FnMut(&Path) -> Result<()>) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(walk_error)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = dest.join(rel);
        let ft = entry.file_type();

        if ft.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)?;
        }

        if ft.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
        on_file(&target)?;
    }
    Ok(())
}

/// Move `src` to `dest`, falling back to copy + delete across filesystems
pub fn move_tree(src: &Path, dest: &Path) -> Result<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    copy_tree(src, dest, |_| Ok(()))?;
    fs::remove_dir_all(src)?;
    Ok(())
}

#[cfg(unix)]
pub fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn symlink(target: &Path, link: &Path) -> Result<()> {
    Err(Error::IoError(format!(
        "symlinks are not supported here: {} -> {}",
        link.display(),
        target.display()
    )))
}

/// Mark a file executable (0755)
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn walk_error(e: walkdir::Error) -> Error {
    match e.into_io_error() {
        Some(io) => Error::Io(io),
        None => Error::IoError("filesystem loop while walking tree".to_string()),
    }
}
