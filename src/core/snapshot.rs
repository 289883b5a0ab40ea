//! Baselines and snapshots
//!
//! Both are path-keyed maps of fingerprints produced with a single
//! algorithm. A [`Baseline`] is the trusted reference; a [`Snapshot`] is the
//! state observed by one cycle and is dropped once that cycle is reported.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;

use super::enumerator::Candidate;
use super::fingerprint::{Algorithm, FileFingerprint, Fingerprinter};
use super::summary::ScanIssue;
use crate::error::{FimError, Result};

/// Fingerprints keyed by normalized path; iteration is sorted by path
pub type FileMap = BTreeMap<String, FileFingerprint>;

/// On-disk state captured during one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub algorithm: Algorithm,
    pub captured_at: DateTime<Utc>,
    pub entries: FileMap,
}

impl Snapshot {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            captured_at: Utc::now(),
            entries: FileMap::new(),
        }
    }

    /// Insert a fingerprint under its own path, returning any previous one
    pub fn insert(&mut self, fingerprint: FileFingerprint) -> Option<FileFingerprint> {
        self.entries.insert(fingerprint.path.clone(), fingerprint)
    }

    pub fn get(&self, path: &str) -> Option<&FileFingerprint> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trusted reference state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub algorithm: Algorithm,
    pub created_at: DateTime<Utc>,
    pub entries: FileMap,
}

impl Baseline {
    pub fn new(algorithm: Algorithm, created_at: DateTime<Utc>) -> Self {
        Self {
            algorithm,
            created_at,
            entries: FileMap::new(),
        }
    }

    pub fn insert(&mut self, fingerprint: FileFingerprint) -> Option<FileFingerprint> {
        self.entries.insert(fingerprint.path.clone(), fingerprint)
    }

    pub fn get(&self, path: &str) -> Option<&FileFingerprint> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Snapshot> for Baseline {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            algorithm: snapshot.algorithm,
            created_at: snapshot.captured_at,
            entries: snapshot.entries,
        }
    }
}

/// Fingerprint every candidate on `pool` and gather the results.
///
/// Candidates are hashed in parallel; results are joined in candidate order
/// before being merged into the sorted map. Vanished files are dropped,
/// other per-file failures become issues, and a fatal error aborts.
pub fn capture(
    pool: &ThreadPool,
    fingerprinter: Fingerprinter,
    candidates: &[Candidate],
) -> Result<(Snapshot, Vec<ScanIssue>)> {
    let mut snapshot = Snapshot::new(fingerprinter.algorithm());

    let results: Vec<Result<FileFingerprint>> = pool.install(|| {
        candidates
            .par_iter()
            .map(|candidate| fingerprinter.fingerprint(&candidate.key, &candidate.path))
            .collect()
    });

    let mut issues = Vec::new();
    for result in results {
        match result {
            Ok(fingerprint) => {
                snapshot.insert(fingerprint);
            }
            Err(FimError::FileVanished(path)) => {
                tracing::debug!("File vanished during scan: {}", path.display());
            }
            Err(err) if !err.is_fatal() => {
                tracing::warn!("{}", err);
                issues.push(ScanIssue::from_error(&err));
            }
            Err(err) => return Err(err),
        }
    }

    Ok((snapshot, issues))
}
