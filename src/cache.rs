//! The `SourceCache` facade: key-prefix dispatch to the archive or VCS
//! backend, directory layout ownership, and the public operations.

use crate::archive::ArchiveType;
use crate::backend::archive::ArchiveBackend;
use crate::backend::vcs::{parse_repo_spec, VcsBackend};
use crate::error::{CacheError, Result};
use crate::pack::FileEntry;
use std::path::{Path, PathBuf};

/// A content-addressed source cache rooted at a single directory.
///
/// Never a process-wide singleton: every caller holds its own owned
/// handle, constructed from an explicit path and mirror list.
pub struct SourceCache {
    cache_dir: PathBuf,
    archive: ArchiveBackend,
    vcs: VcsBackend,
}

impl SourceCache {
    /// Open (optionally creating) a cache rooted at `cache_dir` with
    /// the given mirror base URLs.
    pub fn init(cache_dir: &Path, mirrors: Vec<String>, create_dirs: bool) -> Result<Self> {
        if !cache_dir.exists() {
            if create_dirs {
                std::fs::create_dir_all(cache_dir)?;
            } else {
                return Err(CacheError::InvalidArgument(format!(
                    "cache directory {} does not exist and create_dirs is false",
                    cache_dir.display()
                )));
            }
        }
        let cache_dir = cache_dir.canonicalize()?;
        Ok(Self {
            archive: ArchiveBackend::new(cache_dir.clone(), mirrors),
            vcs: VcsBackend::new(cache_dir.clone()),
            cache_dir,
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fetch a known key, acquiring it from `url` (archive keys) or a
    /// VCS remote (`git` keys, which additionally require `project`)
    /// only if it is not already present locally or on a mirror.
    ///
    /// For `git:<commit>`, when the commit is already reachable in
    /// `project`'s mirror this never touches the network, matching the
    /// resolved-key fast path.
    pub fn fetch(&self, key: &str, url: Option<&str>, project: Option<&str>) -> Result<String> {
        let (type_str, digest) = split_key(key)?;

        if type_str == "git" {
            let project = project.ok_or_else(|| {
                CacheError::InvalidArgument("git fetch requires a project name".to_string())
            })?;
            let (repo_url, branch) = url.map(parse_repo_spec).transpose()?.unzip();
            let commit =
                self.vcs.fetch_vcs(project, repo_url, branch.flatten(), Some(digest))?;
            return Ok(format!("git:{commit}"));
        }

        if !is_archive_key_type(type_str) {
            return Err(CacheError::UnknownKeyPrefix(type_str.to_string()));
        }

        if self.archive.contains(type_str, digest) {
            return Ok(key.to_string());
        }
        if self.archive.fetch_from_mirrors(type_str, digest)? {
            return Ok(key.to_string());
        }
        if let Some(url) = url {
            let type_hint = ArchiveType::from_str(type_str);
            return self.archive.fetch_archive(url, type_hint, Some(digest));
        }
        Err(CacheError::NotFound(key.to_string()))
    }

    /// Discover and fetch an archive from `url`, inferring its type
    /// from the URL when `type_hint` is absent, and verifying against
    /// `expected_digest` when the caller already knows it.
    pub fn fetch_archive(
        &self,
        url: &str,
        type_hint: Option<&str>,
        expected_digest: Option<&str>,
    ) -> Result<String> {
        let type_hint = type_hint
            .map(|t| {
                ArchiveType::from_str(t)
                    .ok_or_else(|| CacheError::UnknownKeyPrefix(t.to_string()))
            })
            .transpose()?;
        self.archive.fetch_archive(url, type_hint, expected_digest)
    }

    /// Resolve `rev` (or reuse `expected_commit` if already cached)
    /// against `url` within `project`'s mirror, returning the `git:`
    /// key of the resulting commit.
    pub fn fetch_vcs(
        &self,
        project: &str,
        url: Option<&str>,
        rev: Option<&str>,
        expected_commit: Option<&str>,
    ) -> Result<String> {
        let commit = self.vcs.fetch_vcs(project, url, rev, expected_commit)?;
        Ok(format!("git:{commit}"))
    }

    /// Hit-pack `files` and publish them under `files:<digest>`.
    pub fn put(&self, files: Vec<FileEntry>) -> Result<String> {
        self.archive.put(files)
    }

    /// Verify and extract `key` into `target_dir`.
    pub fn unpack(&self, key: &str, target_dir: &Path) -> Result<()> {
        let (type_str, digest) = split_key(key)?;
        if type_str == "git" {
            return self.vcs.unpack(digest, target_dir);
        }
        if !is_archive_key_type(type_str) {
            return Err(CacheError::UnknownKeyPrefix(type_str.to_string()));
        }
        self.archive.unpack(type_str, digest, target_dir)
    }
}

fn is_archive_key_type(type_str: &str) -> bool {
    type_str == "files" || ArchiveType::from_str(type_str).is_some()
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once(':')
        .filter(|(_, digest)| !digest.is_empty())
        .ok_or_else(|| CacheError::InvalidArgument(format!("malformed key \"{key}\"")))
}
