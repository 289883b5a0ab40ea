//! Core functionality module
//!
//! Contains enumeration, fingerprinting, baseline storage, diffing and the
//! polling watch loop

pub mod diff;
pub mod enumerator;
pub mod events;
pub mod filter;
pub mod fingerprint;
pub mod snapshot;
pub mod store;
pub mod summary;
pub mod watcher;

// Re-export main types
pub use diff::{diff, diff_entries, ChangeKind, ChangeReason, ChangeRecord, ChangeSet, ChangeStats, DiffOptions};
pub use enumerator::{check_key, Candidate, Enumerator};
pub use events::{
    ChangeEvent, ChangeSink, FanoutSink, JsonLinesSink, MemorySink, Milestone, RotatingFile, TracingSink,
    LOG_BACKUPS, LOG_MAX_BYTES,
};
pub use filter::PathMatcher;
pub use fingerprint::{Algorithm, FileFingerprint, Fingerprinter};
pub use snapshot::{capture, Baseline, FileMap, Snapshot};
pub use store::{BaselineStore, FORMAT_VERSION};
pub use summary::{IssueKind, Outcome, ScanIssue, ScanReport};
pub use watcher::{BaselinePolicy, StopSignal, WatchLoop, WatchOptions, WatchState, DEFAULT_INTERVAL, MIN_INTERVAL};
