// src/filesystem/path.rs

//! Path sanitization for paths that come from recipes and archives

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalise an untrusted relative path
///
/// Leading slashes are stripped, `.` components skipped, and any `..`
/// component rejected.
///
/// ```
/// use keg::filesystem::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("/bin/./luau").unwrap(), PathBuf::from("bin/luau"));
/// assert!(sanitize_path("lib/../../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidPath(format!(
                    "{} escapes its root",
                    path_str
                )));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("{} is empty after sanitization", path_str)));
    }

    Ok(normalized)
}

/// Join `path` under `root`, refusing anything that would escape it
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(root.as_ref().join(sanitize_path(path)?))
}

/// Re-root an absolute path under `root` (`/a/b` + `/stage` → `/stage/a/b`)
///
/// Relative paths are returned unchanged.
pub fn reroot(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        let stripped = path.strip_prefix("/").unwrap_or(path);
        root.join(stripped)
    } else {
        path.to_path_buf()
    }
}
