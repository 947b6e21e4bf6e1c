// src/recipe/kitchen/patch.rs

//! Unified diff application and literal text replacement

use crate::error::{Error, Result};
use crate::filesystem::safe_join;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Apply a (possibly multi-file) unified diff to the tree at `root`
///
/// `strip` leading path components are removed from each file name, as
/// with `patch -p<strip>`. Every hunk of every file must apply cleanly.
pub fn apply_unified_diff(root: &Path, diff: &str, strip: u32, label: &str) -> Result<usize> {
    let sections = split_file_sections(diff);
    if sections.is_empty() {
        return Err(patch_error(label, "no file sections found"));
    }

    for section in &sections {
        let patch = diffy::Patch::from_str(section)
            .map_err(|e| patch_error(label, &format!("malformed diff: {}", e)))?;

        let original = patch.original().map(clean_name);
        let modified = patch.modified().map(clean_name);

        let target_name = match (&original, &modified) {
            (_, Some(m)) if m != "/dev/null" => m.clone(),
            (Some(o), _) if o != "/dev/null" => o.clone(),
            _ => return Err(patch_error(label, "diff section names no file")),
        };
        let relative = strip_components(&target_name, strip)
            .ok_or_else(|| patch_error(label, &format!("cannot strip {} from {}", strip, target_name)))?;
        let path = safe_join(root, &relative)?;

        let creating = original.as_deref() == Some("/dev/null");
        let deleting = modified.as_deref() == Some("/dev/null");

        let base = if creating {
            String::new()
        } else {
            fs::read_to_string(&path)
                .map_err(|e| patch_error(label, &format!("{}: {}", relative, e)))?
        };

        let patched = diffy::apply(&base, &patch)
            .map_err(|e| patch_error(label, &format!("{}: {}", relative, e)))?;

        if deleting {
            fs::remove_file(&path)?;
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, patched)?;
        }
        debug!("Patched {}", relative);
    }

    Ok(sections.len())
}

/// Replace `find` with `replace` in each file
///
/// A file that does not contain `find` is an error: a silent no-op would
/// hide an upstream change the recipe has not caught up with.
pub fn inreplace(root: &Path, files: &[String], find: &str, replace: &str, label: &str) -> Result<()> {
    for file in files {
        let path = if Path::new(file).is_absolute() {
            Path::new(file).to_path_buf()
        } else {
            safe_join(root, file)?
        };
        let content = fs::read_to_string(&path)
            .map_err(|e| patch_error(label, &format!("{}: {}", file, e)))?;
        if !content.contains(find) {
            return Err(patch_error(
                label,
                &format!("`{}` not found in {}", find, file),
            ));
        }
        fs::write(&path, content.replace(find, replace))?;
    }
    Ok(())
}

fn patch_error(label: &str, reason: &str) -> Error {
    Error::PatchApplyFailure {
        patch: label.to_string(),
        reason: reason.to_string(),
    }
}

/// Drop git-style timestamps and surrounding whitespace from a file name
fn clean_name(name: &str) -> String {
    name.split('\t').next().unwrap_or(name).trim().to_string()
}

fn strip_components(name: &str, strip: u32) -> Option<String> {
    let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
    let strip = strip as usize;
    if parts.len() <= strip {
        return None;
    }
    Some(parts[strip..].join("/"))
}

/// Split a multi-file diff into single-file sections
///
/// A section starts at a `--- ` line immediately followed by `+++ `.
/// Trailing non-hunk lines (git `diff`/`index` headers of the next file)
/// are dropped so each section parses on its own.
fn split_file_sections(diff: &str) -> Vec<String> {
    let lines: Vec<&str> = diff.lines().collect();
    let starts: Vec<usize> = (0..lines.len())
        .filter(|&i| {
            lines[i].starts_with("--- ") && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
        })
        .collect();

    let mut sections = Vec::new();
    for (k, &start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).copied().unwrap_or(lines.len());
        let mut body: Vec<&str> = lines[start..end].to_vec();
        while body.len() > 2 && !is_hunk_line(body[body.len() - 1]) {
            body.pop();
        }
        let mut section = body.join("\n");
        section.push('\n');
        sections.push(section);
    }
    sections
}

fn is_hunk_line(line: &str) -> bool {
    line.starts_with(' ')
        || line.starts_with('+')
        || line.starts_with('-')
        || line.starts_with('\\')
        || line.starts_with("@@")
}
