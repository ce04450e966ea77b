//! The VCS backend: one bare git mirror per logical project, resolved
//! refs, in-use retention marking, and `git archive` based unpack.

use super::GIT_DIRNAME;
use crate::error::{CacheError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

pub struct VcsBackend {
    cache_dir: PathBuf,
}

/// Split the key-known fetch syntax `"<url>"` or `"<url> <branch>"`
/// (single space separated) into its repo URL and optional branch.
/// More than two space-separated terms is an error, matching
/// `GitSourceCache.fetch`'s `terms = url.split(' ')` in the original.
pub fn parse_repo_spec(raw: &str) -> Result<(&str, Option<&str>)> {
    let mut terms = raw.split(' ');
    let repo = terms.next().filter(|s| !s.is_empty()).ok_or_else(|| {
        CacheError::InvalidArgument(format!("git repository spec \"{raw}\" has no url"))
    })?;
    match (terms.next(), terms.next()) {
        (None, _) => Ok((repo, None)),
        (Some(branch), None) => Ok((repo, Some(branch))),
        _ => Err(CacheError::InvalidArgument(format!(
            "please specify git repository as \"<url> [branchname]\", got \"{raw}\""
        ))),
    }
}

impl VcsBackend {
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn git_root(&self) -> PathBuf {
        self.cache_dir.join(GIT_DIRNAME)
    }

    fn mirror_dir(&self, project: &str) -> PathBuf {
        self.git_root().join(project)
    }

    /// `true` if `commit` is reachable in `project`'s mirror, probed
    /// with `rev-list -n1 --quiet` as the spec requires (not
    /// `cat-file`, which would also accept non-commit objects).
    #[must_use]
    pub fn contains(&self, project: &str, commit: &str) -> bool {
        let dir = self.mirror_dir(project);
        dir.exists() && git(&dir, &["rev-list", "-n1", "--quiet", commit]).is_ok()
    }

    /// Resolve `rev` against `repo_url` without needing a local mirror,
    /// via `git ls-remote`. Errors with [`CacheError::NotFound`] on zero
    /// matches and [`CacheError::AmbiguousRev`] on more than one.
    pub fn resolve_remote_rev(&self, repo_url: &str, rev: &str) -> Result<String> {
        let output = Command::new("git")
            .args(["ls-remote", repo_url, rev])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| external_tool_failure("git ls-remote", &e.to_string()))?;
        if !output.status.success() {
            return Err(external_tool_failure("git ls-remote", &stderr_of(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let candidates: Vec<String> = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect();

        match candidates.as_slice() {
            [] => Err(CacheError::NotFound(format!("{repo_url}@{rev}"))),
            [single] => Ok(single.clone()),
            many => {
                tracing::warn!(rev, url = repo_url, ?many, "ambiguous rev");
                Err(CacheError::AmbiguousRev {
                    rev: rev.to_string(),
                    url: repo_url.to_string(),
                    candidates: many.to_vec(),
                })
            }
        }
    }

    fn ensure_mirror(&self, project: &str) -> Result<PathBuf> {
        let dir = self.mirror_dir(project);
        if !dir.exists() {
            std::fs::create_dir_all(self.git_root())?;
            git(&self.git_root(), &["init", "--quiet", "--bare", project])?;
        }
        Ok(dir)
    }

    /// Drive the `Idle -> Resolving -> Fetching -> Verifying -> Marking
    /// -> Done` flow:
    ///
    /// 1. If `expected_commit` is already reachable in the mirror,
    ///    mark it in-use and return without touching the network.
    /// 2. Else if `rev` is given, resolve it against `url` and fetch
    ///    that rev interactively (inheriting the controlling terminal,
    ///    so a credential helper can prompt).
    /// 3. Else fetch every remote head (skipping peeled tag refs),
    ///    hoping `expected_commit` turns up among them.
    /// 4. Verify the target commit is now reachable; otherwise
    ///    **not-found**.
    /// 5. Mark it in-use, tolerating a pre-existing correct marker.
    pub fn fetch_vcs(
        &self,
        project: &str,
        url: Option<&str>,
        rev: Option<&str>,
        expected_commit: Option<&str>,
    ) -> Result<String> {
        if let Some(commit) = expected_commit {
            if self.contains(project, commit) {
                self.mark_in_use(project, commit)?;
                return Ok(commit.to_string());
            }
        }

        let url = url.ok_or_else(|| {
            CacheError::InvalidArgument(
                "git fetch requires a url when the commit is not already cached".to_string(),
            )
        })?;
        let dir = self.ensure_mirror(project)?;

        let commit = if let Some(rev) = rev {
            let commit = self.resolve_remote_rev(url, rev)?;
            fetch_interactive(&dir, url, rev)?;
            commit
        } else {
            let commit = expected_commit
                .ok_or_else(|| {
                    CacheError::InvalidArgument(
                        "git fetch requires either a rev or an expected commit".to_string(),
                    )
                })?
                .to_string();
            self.fetch_all_heads(&dir, url)?;
            commit
        };

        if !self.contains(project, &commit) {
            return Err(CacheError::NotFound(format!("{url}@{commit}")));
        }

        self.mark_in_use(project, &commit)?;
        Ok(commit)
    }

    /// `git ls-remote <url>`, fetching every head, skipping peeled tag
    /// references (those ending in `^{}`).
    fn fetch_all_heads(&self, dir: &Path, url: &str) -> Result<()> {
        let output = Command::new("git")
            .args(["ls-remote", url])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| external_tool_failure("git ls-remote", &e.to_string()))?;
        if !output.status.success() {
            return Err(external_tool_failure("git ls-remote", &stderr_of(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let refs: Vec<&str> = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter(|r| !r.ends_with("^{}"))
            .collect();
        if refs.is_empty() {
            return Ok(());
        }

        let mut args = vec!["fetch", "--no-tags", "--quiet", url];
        args.extend(refs.iter().copied());
        git(dir, &args)?;
        Ok(())
    }

    /// Create (or silently accept an existing, correctly-pointed)
    /// `inuse/<commit>` branch, protecting the commit from a future
    /// mirror GC.
    fn mark_in_use(&self, project: &str, commit: &str) -> Result<()> {
        let dir = self.mirror_dir(project);
        let branch = format!("inuse/{commit}");
        match git(&dir, &["branch", &branch, commit]) {
            Ok(_) => Ok(()),
            Err(CacheError::ExternalToolFailure { detail, .. })
                if detail.contains("already exists") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Export `commit` as a tree under `target_dir`. Because the
    /// logical project name is not embedded in the key, every mirror
    /// under `git/` is probed with `rev-list -n1 --quiet`; the first
    /// hit wins. `git archive --format=tar` is piped into a tar
    /// extractor; unlike archive unpacking, no common-prefix stripping
    /// happens, since VCS export never nests under a synthetic
    /// top-level directory.
    pub fn unpack(&self, commit: &str, target_dir: &Path) -> Result<()> {
        let root = self.git_root();
        let mirror = std::fs::read_dir(&root)
            .ok()
            .into_iter()
            .flatten()
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .find(|dir| git(dir, &["rev-list", "-n1", "--quiet", commit]).is_ok())
            .ok_or_else(|| CacheError::NotFound(format!("git:{commit}")))?;

        std::fs::create_dir_all(target_dir)?;

        let mut child = Command::new("git")
            .current_dir(&mirror)
            .args(["archive", "--format=tar", commit])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| external_tool_failure("git archive", &e.to_string()))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let members = crate::archive::tar_common::read_members(stdout)?;

        let status = child
            .wait()
            .map_err(|e| external_tool_failure("git archive", &e.to_string()))?;
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                use std::io::Read;
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(external_tool_failure("git archive", &stderr));
        }

        crate::archive::tar_common::extract_members_unprefixed(members, target_dir)
    }
}

/// Fetch `rev` from `url` into `dir`, inheriting stdin/stdout/stderr so
/// an interactive credential helper (`askpass`, SSH agent prompt) can
/// talk to the terminal directly.
fn fetch_interactive(dir: &Path, url: &str, rev: &str) -> Result<()> {
    let status = Command::new("git")
        .current_dir(dir)
        .args(["fetch", "--no-tags", "--quiet", url, rev])
        .status()
        .map_err(|e| external_tool_failure("git fetch", &e.to_string()))?;
    if !status.success() {
        return Err(external_tool_failure("git fetch", "non-zero exit"));
    }
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| external_tool_failure(&format!("git {}", args.join(" ")), &e.to_string()))?;
    if !output.status.success() {
        return Err(external_tool_failure(
            &format!("git {}", args.join(" ")),
            &stderr_of(&output),
        ));
    }
    Ok(output)
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn external_tool_failure(command: &str, detail: &str) -> CacheError {
    CacheError::ExternalToolFailure {
        command: command.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn have_git() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn init_origin(dir: &Path) -> String {
        git(dir, &["init", "-q", "-b", "main"]).unwrap();
        git(dir, &["config", "user.email", "test@example.com"]).unwrap();
        git(dir, &["config", "user.name", "Test"]).unwrap();
        std::fs::write(dir.join("README"), "hello").unwrap();
        git(dir, &["add", "README"]).unwrap();
        git(dir, &["commit", "-q", "-m", "initial"]).unwrap();
        let out = git(dir, &["rev-parse", "HEAD"]).unwrap();
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn fetch_and_unpack_round_trip() {
        if !have_git() {
            return;
        }
        let origin = tempdir().unwrap();
        let commit = init_origin(origin.path());

        let cache = tempdir().unwrap();
        let backend = VcsBackend::new(cache.path().to_path_buf());
        let resolved = backend
            .fetch_vcs("proj", Some(&origin.path().display().to_string()), Some("main"), None)
            .unwrap();
        assert_eq!(resolved, commit);
        assert!(backend.contains("proj", &commit));

        let target = tempdir().unwrap();
        backend.unpack(&commit, target.path()).unwrap();
        assert_eq!(std::fs::read(target.path().join("README")).unwrap(), b"hello");
    }

    #[test]
    fn fetch_with_cached_expected_commit_skips_network() {
        if !have_git() {
            return;
        }
        let origin = tempdir().unwrap();
        let commit = init_origin(origin.path());

        let cache = tempdir().unwrap();
        let backend = VcsBackend::new(cache.path().to_path_buf());
        backend
            .fetch_vcs("proj", Some(&origin.path().display().to_string()), Some("main"), None)
            .unwrap();

        // A bogus, unreachable URL would fail if contacted; passing it
        // here must be fine, since the commit is already in the mirror.
        let result = backend
            .fetch_vcs("proj", Some("https://example.invalid/nope.git"), None, Some(&commit))
            .unwrap();
        assert_eq!(result, commit);
    }

    #[test]
    fn resolve_remote_rev_not_found() {
        if !have_git() {
            return;
        }
        let origin = tempdir().unwrap();
        init_origin(origin.path());
        let cache = tempdir().unwrap();
        let backend = VcsBackend::new(cache.path().to_path_buf());
        let err = backend
            .resolve_remote_rev(&origin.path().display().to_string(), "no-such-ref")
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[test]
    fn missing_url_without_cached_commit_is_invalid_argument() {
        let cache = tempdir().unwrap();
        let backend = VcsBackend::new(cache.path().to_path_buf());
        let err = backend.fetch_vcs("proj", None, None, None).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[test]
    fn parse_repo_spec_url_only() {
        assert_eq!(parse_repo_spec("git://example/repo.git").unwrap(), ("git://example/repo.git", None));
    }

    #[test]
    fn parse_repo_spec_url_and_branch() {
        assert_eq!(
            parse_repo_spec("git://example/repo.git mybranch").unwrap(),
            ("git://example/repo.git", Some("mybranch"))
        );
    }

    #[test]
    fn parse_repo_spec_rejects_extra_terms() {
        let err = parse_repo_spec("git://example/repo.git branch extra").unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }
}
