// src/recipe/kitchen/archive.rs

//! Archive detection, extraction and staging for the Kitchen

use crate::error::{Error, Result};
use crate::filesystem::copy_tree;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use xz2::read::XzDecoder;

/// Supported archive containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    TarXz,
    TarZst,
}

/// Sniff the archive kind from magic bytes
///
/// Returns `None` for anything that is not a tarball (patch files, single
/// scripts), which callers copy verbatim instead of extracting.
pub fn detect_archive(path: &Path) -> Result<Option<ArchiveKind>> {
    let mut header = [0u8; 512];
    let mut file = File::open(path)?;
    let mut n = 0;
    while n < header.len() {
        let read = file.read(&mut header[n..])?;
        if read == 0 {
            break;
        }
        n += read;
    }
    let header = &header[..n];

    let kind = if header.starts_with(&[0x1f, 0x8b]) {
        Some(ArchiveKind::TarGz)
    } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Some(ArchiveKind::TarXz)
    } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Some(ArchiveKind::TarZst)
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
        Some(ArchiveKind::Tar)
    } else {
        None
    };
    Ok(kind)
}

/// Extract an archive into `dest`
pub fn extract_archive(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let file = BufReader::new(File::open(archive)?);
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveKind::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveKind::TarZst => Box::new(zstd::stream::read::Decoder::new(file)?),
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(dest).map_err(|e| {
        Error::IoError(format!(
            "Failed to extract {}: {}",
            archive.display(),
            e
        ))
    })?;
    Ok(())
}

/// If `dir` holds exactly one directory and nothing else, return it
pub fn single_top_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        Ok(Some(entries[0].path()))
    } else {
        Ok(None)
    }
}

/// Unpack `file` into `dest` with the conventions sources expect
///
/// Archives are extracted and a single top-level directory is collapsed,
/// so `dest` ends up holding the project root. Anything else is copied in
/// verbatim as `file_name`.
pub fn stage_file(file: &Path, file_name: &str, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let Some(kind) = detect_archive(file)? else {
        debug!("Staging {} verbatim", file_name);
        fs::copy(file, dest.join(file_name))?;
        return Ok(());
    };

    let scratch = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(dest.parent().unwrap_or(dest))?;
    extract_archive(file, kind, scratch.path())?;

    let root = single_top_dir(scratch.path())?.unwrap_or_else(|| scratch.path().to_path_buf());
    debug!("Staging {} from {}", file_name, root.display());
    copy_tree(&root, dest, |_| Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_detect_archive() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("a.tar");
        fs::write(&tar_path, tarball(&[("x/README", "hi")])).unwrap();
        assert_eq!(detect_archive(&tar_path).unwrap(), Some(ArchiveKind::Tar));

        let gz_path = dir.path().join("a.tar.gz");
        fs::write(&gz_path, gzip(&tarball(&[("x/README", "hi")]))).unwrap();
        assert_eq!(detect_archive(&gz_path).unwrap(), Some(ArchiveKind::TarGz));

        let patch = dir.path().join("fix.patch");
        fs::write(&patch, "--- a/x\n+++ b/x\n").unwrap();
        assert_eq!(detect_archive(&patch).unwrap(), None);
    }

    #[test]
    fn test_stage_collapses_single_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("src.tar.gz");
        fs::write(
            &archive,
            gzip(&tarball(&[
                ("luau-0.578/CMakeLists.txt", "project(luau)"),
                ("luau-0.578/src/main.cpp", "int main() {}"),
            ])),
        )
        .unwrap();

        let dest = dir.path().join("source");
        stage_file(&archive, "src.tar.gz", &dest).unwrap();
        assert!(dest.join("CMakeLists.txt").is_file());
        assert!(dest.join("src/main.cpp").is_file());
    }

    #[test]
    fn test_stage_keeps_multiple_roots() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("flat.tar");
        fs::write(&archive, tarball(&[("a.txt", "a"), ("b/c.txt", "c")])).unwrap();

        let dest = dir.path().join("out");
        stage_file(&archive, "flat.tar", &dest).unwrap();
        assert!(dest.join("a.txt").is_file());
        assert!(dest.join("b/c.txt").is_file());
    }

    #[test]
    fn test_stage_plain_file_copied() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cached");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();

        let dest = dir.path().join("out");
        stage_file(&script, "install.sh", &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("install.sh")).unwrap(),
            "#!/bin/sh\necho hi\n"
        );
    }
}
