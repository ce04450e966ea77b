//! The archive backend: download, verify, atomically publish, mirror
//! fallback, and unpack for `tar.gz` / `tar.bz2` / `zip` / `files` keys.

use super::{FILES_DIRNAME, PACKS_DIRNAME};
use crate::archive::ArchiveType;
use crate::error::{CacheError, Result};
use crate::hash::digest_bytes;
use crate::pack::{self, FileEntry};
use crate::scatter;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct ArchiveBackend {
    cache_dir: PathBuf,
    mirrors: Vec<String>,
    client: reqwest::blocking::Client,
}

impl ArchiveBackend {
    #[must_use]
    pub fn new(cache_dir: PathBuf, mirrors: Vec<String>) -> Self {
        Self {
            cache_dir,
            mirrors,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn packs_dir(&self) -> PathBuf {
        self.cache_dir.join(PACKS_DIRNAME)
    }

    fn files_dir(&self) -> PathBuf {
        self.cache_dir.join(FILES_DIRNAME)
    }

    /// On-disk location for a published artifact. `files` packs live
    /// directly under the cache root (`files/<digest>`, not
    /// `packs/files/<digest>`) to preserve the original layout; every
    /// other type lives under `packs/<type>/<digest>`.
    fn pack_path(&self, type_str: &str, digest: &str) -> PathBuf {
        if type_str == "files" {
            self.files_dir().join(digest)
        } else {
            self.packs_dir().join(type_str).join(digest)
        }
    }

    /// `true` if the artifact identified by `type_str:digest` is already on disk.
    #[must_use]
    pub fn contains(&self, type_str: &str, digest: &str) -> bool {
        self.pack_path(type_str, digest).exists()
    }

    /// Try each configured mirror in order, appending
    /// `/packs/<type>/<digest>` to its base URL. The first mirror that
    /// serves the artifact wins; a not-found response is swallowed and
    /// the next mirror is tried.
    pub fn fetch_from_mirrors(&self, type_str: &str, digest: &str) -> Result<bool> {
        for mirror in &self.mirrors {
            let url = format!("{mirror}/{PACKS_DIRNAME}/{type_str}/{digest}");
            match self.download_and_publish(&url, type_str, Some(digest)) {
                Ok(_) => return Ok(true),
                Err(CacheError::NotFound(_)) => {
                    tracing::debug!(mirror, type_str, digest, "mirror miss");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(false)
    }

    /// Fetch an archive whose key may or may not be known up front.
    ///
    /// If `expected_digest` is given and the artifact is already
    /// cached (or a mirror has it), no network request to `url` is
    /// made. Otherwise downloads from `url`, verifies the archive
    /// structurally, checks the digest if one was expected, and
    /// publishes atomically.
    pub fn fetch_archive(
        &self,
        url: &str,
        type_hint: Option<ArchiveType>,
        expected_digest: Option<&str>,
    ) -> Result<String> {
        let archive_type = type_hint
            .or_else(|| ArchiveType::infer_from_url(url))
            .ok_or_else(|| {
                CacheError::InvalidArgument(format!("unable to infer archive type of \"{url}\""))
            })?;
        let type_str = archive_type.as_str();

        if let Some(digest) = expected_digest {
            if self.contains(type_str, digest) {
                return Ok(format!("{type_str}:{digest}"));
            }
            if !self.mirrors.is_empty() && self.fetch_from_mirrors(type_str, digest)? {
                return Ok(format!("{type_str}:{digest}"));
            }
        }

        self.download_and_publish(url, type_str, expected_digest)
    }

    /// Download `url`, verify it structurally and (if given) against
    /// `expected_digest`, then atomically publish it and return its key.
    fn download_and_publish(
        &self,
        url: &str,
        type_str: &str,
        expected_digest: Option<&str>,
    ) -> Result<String> {
        let dest_dir = if type_str == "files" { self.files_dir() } else { self.packs_dir().join(type_str) };
        fs::create_dir_all(&dest_dir)?;

        let mut temp = tempfile::Builder::new()
            .prefix("downloading-")
            .tempfile_in(&dest_dir)?;

        self.stream_to(url, temp.as_file_mut())?;

        let bytes = fs::read(temp.path())?;
        let handler = ArchiveType::from_str(type_str).map(ArchiveType::handler);
        if let Some(handler) = &handler {
            if !handler.verify(&bytes) {
                return Err(CacheError::InvalidArchive(url.to_string()));
            }
        }

        let computed_digest = digest_bytes(&bytes);
        if let Some(expected) = expected_digest {
            if expected != computed_digest {
                return Err(CacheError::DigestMismatch {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual: computed_digest,
                });
            }
        }

        let dest = self.pack_path(type_str, &computed_digest);
        publish_atomically(temp, &dest)?;
        Ok(format!("{type_str}:{computed_digest}"))
    }

    fn stream_to(&self, url: &str, sink: &mut impl Write) -> Result<()> {
        if let Some(path) = url.strip_prefix("file:") {
            let mut file = fs::File::open(path).map_err(|e| {
                CacheError::NotFound(format!("file url \"{url}\" could not be opened: {e}"))
            })?;
            std::io::copy(&mut file, sink)?;
            return Ok(());
        }

        tracing::info!(url, "downloading archive");
        let mut response = self.client.get(url).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CacheError::NotFound(url.to_string()));
        }
        let response = response.error_for_status_ref().map(|_| &mut response)?;
        response.copy_to(sink)?;
        Ok(())
    }

    /// Put in-memory file contents into the cache, returning the `files:` key.
    pub fn put(&self, files: Vec<FileEntry>) -> Result<String> {
        let (key, bytes) = pack::hit_pack(files);
        let digest = key.strip_prefix("files:").expect("hit_pack always returns a files: key");
        let dest = self.files_dir().join(digest);
        if !dest.exists() {
            fs::create_dir_all(&self.files_dir())?;
            // A concurrent writer publishing identical content is benign.
            match fs::OpenOptions::new().write(true).create_new(true).open(&dest) {
                Ok(mut f) => f.write_all(&bytes)?,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(CacheError::Io(e)),
            }
        }
        Ok(key)
    }

    /// Open and verify the pack for `type_str:digest`, then extract it
    /// into `target_dir` (dispatching to the matching archive handler,
    /// or to hit-unpack + scatter for `files`).
    pub fn unpack(&self, type_str: &str, digest: &str, target_dir: &Path) -> Result<()> {
        let path = self.pack_path(type_str, digest);
        let mut file = fs::File::open(&path).map_err(|_| {
            CacheError::NotFound(format!("{type_str}:{digest}"))
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        fs::create_dir_all(target_dir)?;

        if type_str == "files" {
            let files = pack::hit_unpack(&bytes, digest)?;
            scatter::scatter_files(&files, target_dir)
        } else {
            let archive_type = ArchiveType::from_str(type_str)
                .ok_or_else(|| CacheError::UnknownKeyPrefix(type_str.to_string()))?;
            archive_type.handler().unpack(&bytes, target_dir, digest)
        }
    }
}

/// Make `temp` read-only for everyone and atomically rename it into
/// `dest`. If `dest` already exists (a concurrent identical publish
/// raced us), that is success, not an error.
fn publish_atomically(temp: tempfile::NamedTempFile, dest: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file().set_permissions(fs::Permissions::from_mode(0o444))?;
    }

    match temp.persist(dest) {
        Ok(_) => Ok(()),
        Err(e) if dest.exists() => {
            // Benign race: identical content already published by someone else.
            drop(e.file);
            Ok(())
        }
        Err(e) => Err(CacheError::Io(e.error)),
    }
}
