//! Cycle results
//!
//! A [`ScanReport`] is what one scan (or one watch cycle) hands back to its
//! caller: the classified change set, the non-fatal issues met on the way,
//! and the [`Outcome`] a caller branches on.

use std::path::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diff::{ChangeSet, ChangeStats};
use super::fingerprint::Algorithm;
use crate::error::FimError;

/// The three results a caller must handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NoChanges,
    ChangesFound,
    Error,
}

impl Outcome {
    /// Process exit code: 0 clean, 2 changes, 1 error
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::NoChanges => 0,
            Outcome::ChangesFound => 2,
            Outcome::Error => 1,
        }
    }

    /// Combine results of several cycles; the most severe wins
    pub fn merge(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Outcome::Error, _) | (_, Outcome::Error) => Outcome::Error,
            (Outcome::ChangesFound, _) | (_, Outcome::ChangesFound) => Outcome::ChangesFound,
            _ => Outcome::NoChanges,
        }
    }
}

/// Category of a non-fatal problem met during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A file could not be opened or read
    Unreadable,
    /// A directory could not be listed; its subtree was skipped
    PermissionDenied,
    /// A configured root does not exist
    Missing,
    /// A followed symlink pointed back into its own ancestry
    SymlinkLoop,
    /// Any other walker failure
    Walk,
}

/// A per-file or per-directory failure that did not stop the cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: String,
    pub kind: IssueKind,
    pub detail: String,
}

impl ScanIssue {
    pub fn new(path: &Path, kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            path: path.display().to_string(),
            kind,
            detail: detail.into(),
        }
    }

    /// Convert a non-fatal engine error into an issue
    pub fn from_error(err: &FimError) -> Self {
        match err {
            FimError::FileUnreadable { path, source } => {
                Self::new(path, IssueKind::Unreadable, source.to_string())
            }
            FimError::PermissionDenied(path) => {
                Self::new(path, IssueKind::PermissionDenied, err.to_string())
            }
            FimError::FileVanished(path) => Self::new(path, IssueKind::Missing, err.to_string()),
            other => Self::new(Path::new(""), IssueKind::Walk, other.to_string()),
        }
    }
}

/// Result of one scan cycle
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// 1-based cycle number (always 1 for a one-shot scan)
    pub cycle: u64,
    pub algorithm: Algorithm,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_scanned: usize,
    pub changes: ChangeSet,
    pub issues: Vec<ScanIssue>,
}

impl ScanReport {
    /// Issues never turn a clean scan into an error
    pub fn outcome(&self) -> Outcome {
        if self.changes.is_empty() {
            Outcome::NoChanges
        } else {
            Outcome::ChangesFound
        }
    }

    pub fn stats(&self) -> ChangeStats {
        self.changes.stats()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}
