//! Cache directory / mirror configuration loading.
//!
//! This is the "configuration file loading" collaborator the cache
//! itself treats as external: nothing in [`crate::cache`] or
//! [`crate::backend`] reads a config file directly, they only take a
//! cache root and a mirror list as constructor arguments. This module
//! exists purely to supply those arguments to the CLI.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The environment variable that, if set, points at a config file to
/// load before falling back to the platform default location.
pub const CONFIG_ENV_VAR: &str = "HITCACHE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory the cache owns (`packs/`, `files/`, `git/` live under it).
    pub cache_dir: PathBuf,
    /// Mirror base URLs consulted before falling back to the primary URL.
    pub mirrors: Vec<String>,
    /// Whether `cache_dir` should be created if it does not already exist.
    pub create_dirs: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().map_or_else(
            || fallback_home_dir().join(".hitcache"),
            |d| d.join("hitcache"),
        );
        Self {
            cache_dir,
            mirrors: Vec::new(),
            create_dirs: true,
        }
    }
}

fn fallback_home_dir() -> PathBuf {
    home::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl CacheConfig {
    /// Parse a `CacheConfig` from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| CacheError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Resolve the config the way the CLI does: an explicit path if
    /// given, else `$HITCACHE_CONFIG`, else the platform config
    /// directory, defaulting if none of those exist.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&env_path));
        }
        if let Some(default_path) = default_config_path() {
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }
        Ok(Self::default())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hitcache").join("config.toml"))
}
