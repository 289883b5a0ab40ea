pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod monitor;

pub use config::{ConfigOverrides, MonitorConfig};
pub use error::{FimError, Result};
pub use monitor::Monitor;
pub use crate::core::{
    Algorithm, Baseline, BaselinePolicy, BaselineStore, ChangeEvent, ChangeKind, ChangeReason,
    ChangeRecord, ChangeSet, ChangeSink, IssueKind, Outcome, ScanIssue, ScanReport, Snapshot,
    StopSignal, WatchLoop, WatchOptions,
};
