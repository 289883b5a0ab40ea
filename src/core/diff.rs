//! Baseline/snapshot comparison
//!
//! [`diff`] is a pure function of its inputs: no I/O, no clock, no logging.
//! Both sides are path-sorted maps, so a single merge pass yields records
//! already in path order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::fingerprint::FileFingerprint;
use super::snapshot::{Baseline, FileMap, Snapshot};
use crate::config::MonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
        })
    }
}

/// Why a path present on both sides was reported as modified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    /// Digest differs
    Content,
    /// Digest equal, tracked permission bits differ
    Permissions,
    /// Digest equal, size differs or (strict mode) mtime differs
    Metadata,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeReason::Content => "content",
            ChangeReason::Permissions => "permissions",
            ChangeReason::Metadata => "metadata",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ChangeReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<FileFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<FileFingerprint>,
}

impl ChangeRecord {
    pub fn added(current: FileFingerprint) -> Self {
        Self {
            path: current.path.clone(),
            kind: ChangeKind::Added,
            reason: None,
            previous: None,
            current: Some(current),
        }
    }

    pub fn removed(previous: FileFingerprint) -> Self {
        Self {
            path: previous.path.clone(),
            kind: ChangeKind::Removed,
            reason: None,
            previous: Some(previous),
            current: None,
        }
    }

    pub fn modified(previous: FileFingerprint, current: FileFingerprint, reason: ChangeReason) -> Self {
        Self {
            path: current.path.clone(),
            kind: ChangeKind::Modified,
            reason: Some(reason),
            previous: Some(previous),
            current: Some(current),
        }
    }

    /// Short human-readable explanation, used by sinks and text output
    pub fn detail(&self) -> Option<String> {
        let reason = self.reason?;
        let (prev, curr) = (self.previous.as_ref()?, self.current.as_ref()?);
        Some(match reason {
            ChangeReason::Content => format!("content ({} -> {} bytes)", prev.size, curr.size),
            ChangeReason::Permissions => match (prev.mode, curr.mode) {
                (Some(a), Some(b)) => format!("permissions ({:o} -> {:o})", a, b),
                _ => "permissions".to_string(),
            },
            ChangeReason::Metadata => {
                if prev.size != curr.size {
                    format!("metadata (size {} -> {})", prev.size, curr.size)
                } else {
                    format!("metadata (mtime {} -> {})", prev.mtime.to_rfc3339(), curr.mtime.to_rfc3339())
                }
            }
        })
    }
}

/// Per-kind counters of a change set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeStats {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ChangeStats {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

/// Change records sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    records: Vec<ChangeRecord>,
}

impl ChangeSet {
    /// Build a change set from records in any order
    pub fn from_records(mut records: Vec<ChangeRecord>) -> Self {
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Self { records }
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeRecord> + '_ {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    pub fn stats(&self) -> ChangeStats {
        let mut stats = ChangeStats::default();
        for record in &self.records {
            match record.kind {
                ChangeKind::Added => stats.added += 1,
                ChangeKind::Removed => stats.removed += 1,
                ChangeKind::Modified => stats.modified += 1,
            }
        }
        stats
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ChangeRecord;
    type IntoIter = std::slice::Iter<'a, ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Which fields beyond the digest take part in the comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub track_perms: bool,
    pub strict_mtime: bool,
}

impl DiffOptions {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            track_perms: config.track_perms,
            strict_mtime: config.strict_mtime,
        }
    }
}

/// Classify the differences between a baseline and a snapshot
pub fn diff(baseline: &Baseline, snapshot: &Snapshot, options: DiffOptions) -> ChangeSet {
    diff_entries(&baseline.entries, &snapshot.entries, options)
}

/// Classify the differences between two fingerprint maps.
///
/// Paths only in `current` are added, paths only in `previous` are removed,
/// and paths on both sides are modified when [`compare`] finds a reason.
pub fn diff_entries(previous: &FileMap, current: &FileMap, options: DiffOptions) -> ChangeSet {
    let mut records = Vec::new();
    let mut old = previous.iter().peekable();
    let mut new = current.iter().peekable();

    loop {
        let order = match (old.peek(), new.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((a, _)), Some((b, _))) => a.cmp(b),
        };

        match order {
            Ordering::Less => {
                if let Some((path, prev)) = old.next() {
                    records.push(ChangeRecord::removed(keyed(path, prev)));
                }
            }
            Ordering::Greater => {
                if let Some((path, curr)) = new.next() {
                    records.push(ChangeRecord::added(keyed(path, curr)));
                }
            }
            Ordering::Equal => {
                if let (Some((path, prev)), Some((_, curr))) = (old.next(), new.next()) {
                    if let Some(reason) = compare(prev, curr, options) {
                        records.push(ChangeRecord::modified(
                            keyed(path, prev),
                            keyed(path, curr),
                            reason,
                        ));
                    }
                }
            }
        }
    }

    ChangeSet { records }
}

/// Reason a path present on both sides changed, if it did.
///
/// Content wins over permissions, which win over metadata. Permission bits
/// are only compared when tracked and known on both sides.
pub fn compare(prev: &FileFingerprint, curr: &FileFingerprint, options: DiffOptions) -> Option<ChangeReason> {
    if prev.digest != curr.digest {
        return Some(ChangeReason::Content);
    }

    if options.track_perms {
        if let (Some(a), Some(b)) = (prev.mode, curr.mode) {
            if a != b {
                return Some(ChangeReason::Permissions);
            }
        }
    }

    if prev.size != curr.size || (options.strict_mtime && prev.mtime != curr.mtime) {
        return Some(ChangeReason::Metadata);
    }

    None
}

// The map key is authoritative for the record path
fn keyed(path: &str, fingerprint: &FileFingerprint) -> FileFingerprint {
    FileFingerprint {
        path: path.to_string(),
        ..fingerprint.clone()
    }
}
