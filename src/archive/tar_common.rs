//! Shared decode/extract logic for the two tar-based archive formats.

use super::common_dir_prefix;
use crate::error::{CacheError, Result};
use crate::scatter::resolve_member_path;
use std::io::Read;
use std::path::Path;
use tar::Archive;

pub(crate) struct TarMember {
    pub name: String,
    pub is_dir: bool,
    pub contents: Vec<u8>,
}

fn tar_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::CorruptArchive {
        path: Path::new("<in-memory>").into(),
        reason: e.to_string(),
    }
}

pub(crate) fn read_members<R: Read>(reader: R) -> Result<Vec<TarMember>> {
    let mut archive = Archive::new(reader);
    let mut members = Vec::new();
    for entry in archive.entries().map_err(tar_err)? {
        let mut entry = entry.map_err(tar_err)?;
        let name = entry.path().map_err(tar_err)?.to_string_lossy().into_owned();
        let is_dir = entry.header().entry_type().is_dir();
        let mut contents = Vec::new();
        if !is_dir {
            entry.read_to_end(&mut contents).map_err(tar_err)?;
        }
        members.push(TarMember { name, is_dir, contents });
    }
    Ok(members)
}

pub(crate) fn extract_members(members: Vec<TarMember>, target_dir: &Path) -> Result<()> {
    let file_names: Vec<String> =
        members.iter().filter(|m| !m.is_dir).map(|m| m.name.clone()).collect();
    let prefix = common_dir_prefix(&file_names);
    write_members(members, &prefix, target_dir)
}

/// Like [`extract_members`] but never strips a common leading
/// directory: used for `git archive` exports, which do not nest their
/// contents under a synthetic top-level directory the way release
/// tarballs conventionally do.
pub(crate) fn extract_members_unprefixed(members: Vec<TarMember>, target_dir: &Path) -> Result<()> {
    write_members(members, "", target_dir)
}

fn write_members(members: Vec<TarMember>, prefix: &str, target_dir: &Path) -> Result<()> {
    // First pass: resolve and validate every destination so a traversal
    // attempt anywhere in the archive fails before any byte is written.
    let mut planned = Vec::new();
    for member in &members {
        if member.is_dir {
            continue;
        }
        let stripped = member.name.strip_prefix(prefix).unwrap_or(&member.name);
        if stripped.is_empty() {
            continue;
        }
        let dest = resolve_member_path(target_dir, stripped)?;
        planned.push((dest, &member.contents));
    }

    for (dest, contents) in planned {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, contents)?;
    }
    Ok(())
}
