//! Safe materialization of an in-memory file set onto the filesystem.

use crate::error::{CacheError, Result};
use crate::pack::FileEntry;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Write each `(filename, contents)` pair under `target_dir`.
///
/// Parent directories are created as needed. An existing destination
/// file is an error (exclusive create, never an overwrite). Every
/// destination is checked, after lexical normalization, to remain a
/// descendant of `target_dir` before anything is written.
pub fn scatter_files(files: &[FileEntry], target_dir: &Path) -> Result<()> {
    // Resolve every destination up front so a traversal attempt in any
    // single entry fails before the first byte of any entry is written.
    let destinations: Vec<PathBuf> = files
        .iter()
        .map(|(filename, _)| resolve_member_path(target_dir, filename))
        .collect::<Result<_>>()?;

    for (dest, (_, contents)) in destinations.iter().zip(files) {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    tracing::warn!(path = %dest.display(), "refusing to overwrite existing file");
                    CacheError::SecurityViolation(format!(
                        "refusing to overwrite existing file: {}",
                        dest.display()
                    ))
                } else {
                    CacheError::Io(e)
                }
            })?;
        file.write_all(contents)?;
    }
    Ok(())
}

/// Resolve `member` against `target_dir`, rejecting any path that would
/// escape it after lexical normalization (no `..` climbing past the
/// root, no absolute paths).
pub fn resolve_member_path(target_dir: &Path, member: &str) -> Result<PathBuf> {
    if member.starts_with('/') {
        tracing::warn!(member, "rejecting absolute member path");
        return Err(CacheError::SecurityViolation(format!(
            "member path must not be absolute: {member}"
        )));
    }

    let joined = target_dir.join(member);
    let normalized = normalize_lexically(&joined);
    let target_normalized = normalize_lexically(target_dir);

    if !normalized.starts_with(&target_normalized) {
        tracing::warn!(member, "rejecting member path that escapes target directory");
        return Err(CacheError::SecurityViolation(format!(
            "member path escapes target directory: {member}"
        )));
    }
    Ok(normalized)
}

/// Normalize `..` and `.` components without touching the filesystem
/// (unlike `Path::canonicalize`, which requires every component to
/// exist).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
