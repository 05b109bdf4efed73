use std::path::PathBuf;

use thiserror::Error;

/// Every way a VFS operation can fail.
///
/// Propagation follows the policy in the design notes: `NotAbsolutePath` is raised
/// eagerly before any state is touched, `BadCacheFormat`/`Io`/`HashFailed` abort the
/// current operation while leaving the last-integrated `IndexRoot` untouched, and
/// `ExtractionFailed` is recoverable during analysis (the node becomes a leaf) but
/// fatal during staging.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("path is not absolute: {0}")]
    NotAbsolutePath(PathBuf),

    #[error("bad cache format: {0}")]
    BadCacheFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to extract archive {path}: {source}")]
    ExtractionFailed {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to hash {path}: {source}")]
    HashFailed { path: PathBuf, source: std::io::Error },

    #[error("lookup missing: {0}")]
    LookupMissing(String),

    #[error("known root hash {hash} already claimed by {first:?}, conflicts with {second:?}")]
    ConflictingKnownRoot {
        hash: crate::hash::ContentHash,
        first: String,
        second: String,
    },
}

pub type Result<T> = std::result::Result<T, VfsError>;
