use super::tar_common::{extract_members, read_members};
use super::{ArchiveHandler, verify_digest};
use crate::error::Result;
use flate2::read::GzDecoder;
use std::path::Path;

/// gzip-compressed tar, the common `.tar.gz` / `.tgz` distribution format.
pub struct TarGzHandler;

impl ArchiveHandler for TarGzHandler {
    fn verify(&self, bytes: &[u8]) -> bool {
        read_members(GzDecoder::new(bytes)).is_ok()
    }

    fn unpack(&self, bytes: &[u8], target_dir: &Path, expected_digest: &str) -> Result<()> {
        verify_digest(bytes, expected_digest)?;
        let members = read_members(GzDecoder::new(bytes))?;
        extract_members(members, target_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn make_tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn verify_accepts_well_formed_archive() {
        let bytes = make_tar_gz(&[("proj-1.0/README", b"hi")]);
        assert!(TarGzHandler.verify(&bytes));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!TarGzHandler.verify(b"not a gzip stream at all"));
    }

    #[test]
    fn strips_common_prefix_on_unpack() {
        let bytes =
            make_tar_gz(&[("proj-1.0/README", b"hi"), ("proj-1.0/src/main", b"fn main(){}")]);
        let digest = crate::hash::digest_bytes(&bytes);
        let dir = tempdir().unwrap();
        TarGzHandler.unpack(&bytes, dir.path(), &digest).unwrap();
        assert_eq!(std::fs::read(dir.path().join("README")).unwrap(), b"hi");
        assert_eq!(std::fs::read(dir.path().join("src/main")).unwrap(), b"fn main(){}");
        assert!(!dir.path().join("proj-1.0").exists());
    }

    #[test]
    fn rejects_corrupt_digest() {
        let bytes = make_tar_gz(&[("a", b"x")]);
        let dir = tempdir().unwrap();
        let err = TarGzHandler.unpack(&bytes, dir.path(), "wrong").unwrap_err();
        assert!(matches!(err, CacheError::CorruptArchive { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn rejects_path_traversal_member() {
        // Two members with no shared directory component leave the
        // common-prefix strip empty, so "../evil" reaches the
        // containment check unmodified.
        let bytes = make_tar_gz(&[("good/README", b"hi"), ("../evil", b"x")]);
        let digest = crate::hash::digest_bytes(&bytes);
        let dir = tempdir().unwrap();
        let err = TarGzHandler.unpack(&bytes, dir.path(), &digest).unwrap_err();
        assert!(matches!(err, CacheError::SecurityViolation(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
