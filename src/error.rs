//! Error types for the integrity engine
//!
//! Fatal errors abort the current operation. Per-file and per-directory
//! failures are non-fatal: the pipeline turns them into [`ScanIssue`]s that
//! travel alongside the change set instead of replacing it.
//!
//! [`ScanIssue`]: crate::core::ScanIssue

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building, loading or comparing baselines
#[derive(Error, Debug)]
pub enum FimError {
    // Configuration errors (pre-flight)
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    // Baseline errors
    #[error("No baseline found at {0}; run `baseline` first")]
    BaselineMissing(PathBuf),

    #[error("Failed to read baseline {path}: {source}")]
    BaselineRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Baseline {path} is corrupt: {reason}")]
    BaselineCorrupt { path: PathBuf, reason: String },

    #[error("Baseline {path} has format version {found}, this build reads version {supported}")]
    UnsupportedBaselineVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("Failed to write baseline {path}: {source}")]
    BaselineWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Per-file errors
    #[error("File vanished during scan: {0}")]
    FileVanished(PathBuf),

    #[error("Failed to read {path}: {source}")]
    FileUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Failed to start fingerprint workers: {0}")]
    WorkerPool(String),
}

impl FimError {
    /// Whether this error must abort the running operation.
    ///
    /// `FileVanished`, `FileUnreadable` and `PermissionDenied` only ever
    /// affect a single file or subtree and are collected per cycle.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FimError::FileVanished(_)
                | FimError::FileUnreadable { .. }
                | FimError::PermissionDenied(_)
        )
    }
}

/// Result type alias for the integrity engine
pub type Result<T> = std::result::Result<T, FimError>;
