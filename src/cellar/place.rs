// src/cellar/place.rs

//! File placement into the incoming keg

use crate::error::Result;
use crate::filesystem::symlink;
use std::fs;
use std::path::Path;

/// Places one staged file or symlink at its target path
///
/// The target's parent directory already exists.
pub trait Placer: Send + Sync {
    fn place(&self, source: &Path, target: &Path) -> Result<()>;
}

/// Copies files (modes included) and recreates symlinks
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyPlacer;

impl Placer for CopyPlacer {
    fn place(&self, source: &Path, target: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(source)?;
        if meta.file_type().is_symlink() {
            symlink(&fs::read_link(source)?, target)
        } else {
            fs::copy(source, target)?;
            Ok(())
        }
    }
}
