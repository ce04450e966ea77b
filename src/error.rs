//! Error types for the source cache.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience `Result` type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("unknown key prefix: {0}")]
    UnknownKeyPrefix(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("digest mismatch downloading {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("corrupt archive at {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("corrupt hit-pack: {0}")]
    CorruptPack(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("invalid archive downloaded from {0}")]
    InvalidArchive(String),

    #[error("external tool failure running `{command}`: {detail}")]
    ExternalToolFailure { command: String, detail: String },

    #[error("ambiguous rev {rev} in {url}: matched {candidates:?}")]
    AmbiguousRev {
        rev: String,
        url: String,
        candidates: Vec<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),
}
