//! Streaming SHA-256 wrappers and base64 digest formatting.
//!
//! [`HashingReader`] and [`HashingWriter`] tee every byte that passes
//! through them into a running SHA-256 state, so a caller can compute a
//! digest in the same pass that reads or writes the underlying data
//! (no second traversal of potentially large archives).

use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Encode a raw SHA-256 digest as 43 characters of unpadded, URL-safe base64.
#[must_use]
pub fn format_digest(hasher: Sha256) -> String {
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Hash the given bytes directly, returning the formatted digest.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format_digest(hasher)
}

/// A read adapter that updates a running SHA-256 digest with every byte read.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Consume the reader, returning the base64 digest of everything read.
    #[must_use]
    pub fn finalize(self) -> String {
        format_digest(self.hasher)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// A write adapter that updates a running SHA-256 digest with every byte written.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Consume the writer, returning the base64 digest of everything written.
    #[must_use]
    pub fn finalize(self) -> String {
        format_digest(self.hasher)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_43_chars_and_url_safe() {
        let d = digest_bytes(b"hello world");
        assert_eq!(d.len(), 43);
        assert!(d.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn hashing_reader_matches_direct_digest() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut reader = HashingReader::new(&data[..]);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(reader.finalize(), digest_bytes(&data));
    }

    #[test]
    fn hashing_writer_matches_direct_digest() {
        let data = b"streamed contents".to_vec();
        let mut sink = Vec::new();
        let mut writer = HashingWriter::new(&mut sink);
        writer.write_all(&data).unwrap();
        assert_eq!(writer.finalize(), digest_bytes(&data));
        assert_eq!(sink, data);
    }
}
