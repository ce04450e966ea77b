use super::tar_common::{extract_members, read_members};
use super::{ArchiveHandler, verify_digest};
use crate::error::Result;
use bzip2::read::BzDecoder;
use std::path::Path;

/// bzip2-compressed tar (`.tar.bz2` / `.tb2` / `.tbz2`).
pub struct TarBz2Handler;

impl ArchiveHandler for TarBz2Handler {
    fn verify(&self, bytes: &[u8]) -> bool {
        read_members(BzDecoder::new(bytes)).is_ok()
    }

    fn unpack(&self, bytes: &[u8], target_dir: &Path, expected_digest: &str) -> Result<()> {
        verify_digest(bytes, expected_digest)?;
        let members = read_members(BzDecoder::new(bytes))?;
        extract_members(members, target_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::Compression;
    use bzip2::write::BzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn make_tar_bz2(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn round_trips_through_unpack() {
        let bytes = make_tar_bz2(&[("pkg-2/a", b"one"), ("pkg-2/dir/b", b"two")]);
        let digest = crate::hash::digest_bytes(&bytes);
        let dir = tempdir().unwrap();
        TarBz2Handler.unpack(&bytes, dir.path(), &digest).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("dir/b")).unwrap(), b"two");
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!TarBz2Handler.verify(b"definitely not bzip2"));
    }
}
