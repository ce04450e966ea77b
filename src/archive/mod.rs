//! Per-format archive verification and safe in-memory extraction.

pub(crate) mod tar_common;
mod targz;
mod tarbz2;
mod zip_handler;

pub use targz::TarGzHandler;
pub use tarbz2::TarBz2Handler;
pub use zip_handler::ZipHandler;

use crate::error::{CacheError, Result};
use std::path::Path;

/// The three archive encodings the cache understands.
///
/// `Files` is deliberately excluded: it is not an archive format, it is
/// the hit-pack codec, handled separately by [`crate::pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveType {
    TarGz,
    TarBz2,
    Zip,
}

impl ArchiveType {
    /// The directory name this type is stored under in `packs/<type>/`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveType::TarGz => "tar.gz",
            ArchiveType::TarBz2 => "tar.bz2",
            ArchiveType::Zip => "zip",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tar.gz" => Some(ArchiveType::TarGz),
            "tar.bz2" => Some(ArchiveType::TarBz2),
            "zip" => Some(ArchiveType::Zip),
            _ => None,
        }
    }

    /// Infer the archive type from a URL's filename suffix.
    #[must_use]
    pub fn infer_from_url(url: &str) -> Option<Self> {
        let name = url.rsplit('/').next().unwrap_or(url);
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tb2") || name.ends_with(".tbz2") {
            Some(ArchiveType::TarBz2)
        } else if name.ends_with(".zip") {
            Some(ArchiveType::Zip)
        } else {
            None
        }
    }

    #[must_use]
    pub fn handler(self) -> Box<dyn ArchiveHandler> {
        match self {
            ArchiveType::TarGz => Box::new(TarGzHandler),
            ArchiveType::TarBz2 => Box::new(TarBz2Handler),
            ArchiveType::Zip => Box::new(ZipHandler),
        }
    }
}

/// Capability every archive format implements: a structural-parse
/// check and a verify-then-extract-from-memory unpack.
pub trait ArchiveHandler {
    /// Parse `bytes` just far enough to confirm it is a well-formed
    /// archive of this type. Returns `false` on any parse error,
    /// never panics.
    fn verify(&self, bytes: &[u8]) -> bool;

    /// Verify `bytes` against `expected_digest`, then extract into
    /// `target_dir`, stripping the archive's common leading directory
    /// component and rejecting any member that would escape
    /// `target_dir`.
    fn unpack(&self, bytes: &[u8], target_dir: &Path, expected_digest: &str) -> Result<()>;
}

/// Check the SHA-256 of `bytes` against `expected_digest`, the shared
/// first step of every handler's `unpack`.
pub(crate) fn verify_digest(bytes: &[u8], expected_digest: &str) -> Result<()> {
    let actual = crate::hash::digest_bytes(bytes);
    if actual != expected_digest {
        return Err(CacheError::CorruptArchive {
            path: Path::new("<in-memory>").to_path_buf(),
            reason: format!("digest mismatch: expected {expected_digest}, got {actual}"),
        });
    }
    Ok(())
}

/// The longest common `/`-separated directory prefix shared by every
/// name in `names`, or `""` if there is none (or the list is empty).
///
/// This mirrors tarball conventions where every member is nested under
/// a single `proj-1.0/` directory; stripping it produces a flat
/// overlay onto the target directory.
#[must_use]
pub fn common_dir_prefix(names: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let split: Vec<Vec<&str>> = names
        .iter()
        .map(|n| {
            let mut parts: Vec<&str> = n.split('/').collect();
            parts.pop(); // drop the basename, keep only directory components
            parts
        })
        .collect();

    let mut common = split[0].clone();
    for parts in &split[1..] {
        let len = common.len().min(parts.len());
        common.truncate(len);
        let mismatch = common.iter().zip(parts.iter()).position(|(a, b)| a != b);
        if let Some(i) = mismatch {
            common.truncate(i);
        }
    }

    if common.is_empty() {
        String::new()
    } else {
        format!("{}/", common.join("/"))
    }
}
