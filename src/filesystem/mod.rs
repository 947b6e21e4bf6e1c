// src/filesystem/mod.rs

//! Filesystem helpers shared by the Kitchen and the Cellar

mod path;
mod tree;

pub use path::{reroot, safe_join, sanitize_path};
pub use tree::{copy_tree, is_empty_dir, list_files, make_executable, move_tree, symlink};
