//! The deterministic "hit-pack" binary format used for `files:` keys.
//!
//! Format: magic `HDSTPCK1`, then entries sorted ascending by filename
//! (byte-lexicographic, not locale-aware), each encoded as
//! `u32 LE fname_len, u32 LE contents_len, fname bytes, contents bytes`.
//! The key is the `files:` prefix followed by the base64 SHA-256 of the
//! full stream. Two inputs differing only in entry order hash identically.

use crate::error::{CacheError, Result};
use crate::hash::digest_bytes;

pub const MAGIC: &[u8; 8] = b"HDSTPCK1";

/// An in-memory `(filename, contents)` pair, the unit the hit-pack codec operates on.
pub type FileEntry = (String, Vec<u8>);

/// Serialize `files` into the hit-pack wire format, returning the
/// `files:<digest>` key and the serialized bytes.
///
/// The input order does not affect the output: entries are always
/// sorted by filename before encoding.
pub fn hit_pack(mut files: Vec<FileEntry>) -> (String, Vec<u8>) {
    files.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut bytes = Vec::with_capacity(MAGIC.len());
    bytes.extend_from_slice(MAGIC);
    for (filename, contents) in &files {
        let fname_bytes = filename.as_bytes();
        bytes.extend_from_slice(&(fname_bytes.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        bytes.extend_from_slice(fname_bytes);
        bytes.extend_from_slice(contents);
    }

    let digest = digest_bytes(&bytes);
    (format!("files:{digest}"), bytes)
}

/// Deserialize a hit-pack stream, verifying it matches `expected_digest`
/// (the part of a `files:<digest>` key after the prefix).
///
/// Fails with [`CacheError::CorruptPack`] if the magic bytes are wrong
/// or the computed digest does not match.
pub fn hit_unpack(bytes: &[u8], expected_digest: &str) -> Result<Vec<FileEntry>> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        tracing::warn!(digest = expected_digest, "hit-pack missing HDSTPCK1 magic");
        return Err(CacheError::CorruptPack("missing HDSTPCK1 magic".to_string()));
    }

    let mut files = Vec::new();
    let mut cursor = MAGIC.len();
    while cursor < bytes.len() {
        if cursor + 8 > bytes.len() {
            tracing::warn!(digest = expected_digest, "hit-pack truncated entry header");
            return Err(CacheError::CorruptPack("truncated entry header".to_string()));
        }
        let fname_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        let contents_len =
            u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
        cursor += 8;

        if cursor + fname_len + contents_len > bytes.len() {
            tracing::warn!(digest = expected_digest, "hit-pack truncated entry payload");
            return Err(CacheError::CorruptPack("truncated entry payload".to_string()));
        }
        let filename = String::from_utf8(bytes[cursor..cursor + fname_len].to_vec()).map_err(|_| {
            tracing::warn!(digest = expected_digest, "hit-pack filename is not valid UTF-8");
            CacheError::CorruptPack("filename is not valid UTF-8".to_string())
        })?;
        cursor += fname_len;
        let contents = bytes[cursor..cursor + contents_len].to_vec();
        cursor += contents_len;

        files.push((filename, contents));
    }

    let digest = crate::hash::digest_bytes(bytes);
    if digest != expected_digest {
        tracing::warn!(expected = expected_digest, actual = digest, "hit-pack digest mismatch");
        return Err(CacheError::CorruptPack(format!(
            "hit-pack does not match key \"files:{expected_digest}\""
        )));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent() {
        let (k1, b1) = hit_pack(vec![("a".into(), b"x".to_vec()), ("b".into(), b"yy".to_vec())]);
        let (k2, b2) = hit_pack(vec![("b".into(), b"yy".to_vec()), ("a".into(), b"x".to_vec())]);
        assert_eq!(k1, k2);
        assert_eq!(b1, b2);
    }

    #[test]
    fn matches_spec_byte_layout() {
        let (_key, bytes) = hit_pack(vec![("a".into(), b"x".to_vec()), ("b".into(), b"yy".to_vec())]);
        let expected: Vec<u8> = vec![
            0x48, 0x44, 0x53, 0x54, 0x50, 0x43, 0x4B, 0x31, // HDSTPCK1
            0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x61, 0x78, // a/x
            0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x62, 0x79, 0x79, // b/yy
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn round_trip() {
        let files = vec![("b/c.txt".into(), b"hello".to_vec()), ("a.txt".into(), b"world".to_vec())];
        let (key, bytes) = hit_pack(files.clone());
        let digest = key.strip_prefix("files:").unwrap();
        let mut unpacked = hit_unpack(&bytes, digest).unwrap();
        unpacked.sort_by(|a, b| a.0.cmp(&b.0));
        let mut sorted = files;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(unpacked, sorted);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = hit_unpack(b"NOTMAGIC", "anything").unwrap_err();
        assert!(matches!(err, CacheError::CorruptPack(_)));
    }

    #[test]
    fn rejects_digest_mismatch() {
        let (_key, bytes) = hit_pack(vec![("a".into(), b"x".to_vec())]);
        let err = hit_unpack(&bytes, "wrong-digest").unwrap_err();
        assert!(matches!(err, CacheError::CorruptPack(_)));
    }
}
