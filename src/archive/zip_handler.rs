use super::{ArchiveHandler, common_dir_prefix, verify_digest};
use crate::error::{CacheError, Result};
use crate::scatter::resolve_member_path;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

/// A zip central-directory archive.
pub struct ZipHandler;

fn zip_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::CorruptArchive {
        path: Path::new("<in-memory>").into(),
        reason: e.to_string(),
    }
}

impl ArchiveHandler for ZipHandler {
    fn verify(&self, bytes: &[u8]) -> bool {
        ZipArchive::new(Cursor::new(bytes)).is_ok()
    }

    fn unpack(&self, bytes: &[u8], target_dir: &Path, expected_digest: &str) -> Result<()> {
        verify_digest(bytes, expected_digest)?;

        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;

        let mut names = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(zip_err)?;
            if !entry.is_dir() {
                names.push(entry.name().to_string());
            }
        }
        let prefix = common_dir_prefix(&names);

        // First pass: resolve and validate every destination.
        let mut planned = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(zip_err)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let stripped = name.strip_prefix(&prefix).unwrap_or(&name).to_string();
            if stripped.is_empty() {
                continue;
            }
            let dest = resolve_member_path(target_dir, &stripped)?;
            planned.push((i, dest));
        }

        for (index, dest) in planned {
            let mut entry = archive.by_index(index).map_err(zip_err)?;
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).map_err(zip_err)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, &contents)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn verify_accepts_well_formed_archive() {
        let bytes = make_zip(&[("proj/a.txt", b"hi")]);
        assert!(ZipHandler.verify(&bytes));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!ZipHandler.verify(b"not a zip"));
    }

    #[test]
    fn strips_prefix_and_extracts() {
        let bytes = make_zip(&[("proj/a.txt", b"hi"), ("proj/sub/b.txt", b"there")]);
        let digest = crate::hash::digest_bytes(&bytes);
        let dir = tempdir().unwrap();
        ZipHandler.unpack(&bytes, dir.path(), &digest).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hi");
        assert_eq!(std::fs::read(dir.path().join("sub/b.txt")).unwrap(), b"there");
    }

    #[test]
    fn rejects_traversal_member() {
        let bytes = make_zip(&[("good/a.txt", b"hi"), ("../evil.txt", b"bad")]);
        let digest = crate::hash::digest_bytes(&bytes);
        let dir = tempdir().unwrap();
        let err = ZipHandler.unpack(&bytes, dir.path(), &digest).unwrap_err();
        assert!(matches!(err, CacheError::SecurityViolation(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
