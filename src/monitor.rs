//! The per-invocation engine context
//!
//! [`Monitor`] owns everything a run needs: the validated config, the
//! compiled exclusion matcher, the fingerprint worker pool and the change
//! sink. It is passed explicitly to every stage; nothing is global.

use std::sync::Arc;

use chrono::Utc;
use rayon::ThreadPool;

use crate::config::MonitorConfig;
use crate::core::{
    capture, diff, Algorithm, Baseline, BaselineStore, ChangeEvent, ChangeSet, ChangeSink,
    DiffOptions, Enumerator, Fingerprinter, PathMatcher, ScanIssue, ScanReport, Snapshot,
    StopSignal, TracingSink, WatchLoop, WatchOptions,
};
use crate::error::{FimError, Result};

pub struct Monitor {
    config: MonitorConfig,
    matcher: Arc<PathMatcher>,
    pool: ThreadPool,
    sink: Box<dyn ChangeSink>,
}

impl Monitor {
    /// Validate `config` and prepare the pipeline. Changes go to a
    /// [`TracingSink`] until another sink is set.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let matcher = Arc::new(PathMatcher::new(&config.excludes, config.ignore_hidden)?);
        let pool = build_pool(config.worker_count())?;

        Ok(Self {
            config,
            matcher,
            pool,
            sink: Box::new(TracingSink),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn ChangeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Swap in a freshly loaded config, keeping the sink
    pub fn reload(&mut self, config: MonitorConfig) -> Result<()> {
        config.validate()?;
        self.matcher = Arc::new(PathMatcher::new(&config.excludes, config.ignore_hidden)?);
        if config.worker_count() != self.config.worker_count() {
            self.pool = build_pool(config.worker_count())?;
        }
        self.config = config;
        tracing::debug!("Config reloaded");
        Ok(())
    }

    /// Enumerate and fingerprint the configured roots with `algorithm`
    pub fn capture(&self, algorithm: Algorithm) -> Result<(Snapshot, Vec<ScanIssue>)> {
        let enumerator = Enumerator::new(&self.config, Arc::clone(&self.matcher));
        let (candidates, mut issues) = enumerator.collect();
        tracing::debug!("Enumerated {} files", candidates.len());

        let fingerprinter = Fingerprinter::new(algorithm, self.config.track_perms);
        let (snapshot, file_issues) = capture(&self.pool, fingerprinter, &candidates)?;
        issues.extend(file_issues);
        Ok((snapshot, issues))
    }

    /// Build a baseline from the current on-disk state
    pub fn baseline(&self) -> Result<(Baseline, Vec<ScanIssue>)> {
        let (snapshot, issues) = self.capture(self.config.algorithm)?;
        tracing::info!(
            "Baseline captured: {} files, {} issues",
            snapshot.len(),
            issues.len()
        );
        Ok((Baseline::from(snapshot), issues))
    }

    /// Build a baseline and persist it to `store`
    pub fn write_baseline(&mut self, store: &BaselineStore) -> Result<(Baseline, Vec<ScanIssue>)> {
        let (baseline, issues) = self.baseline()?;
        store.save(&baseline)?;
        self.milestone(&format!(
            "Baseline created at {} with {} files",
            store.path().display(),
            baseline.len()
        ));
        Ok((baseline, issues))
    }

    /// Scan once against `baseline`
    pub fn scan(&mut self, baseline: &Baseline) -> Result<ScanReport> {
        self.scan_cycle(baseline, 1).map(|(report, _)| report)
    }

    /// Start a polling watch; the returned loop yields one report per cycle
    pub fn watch(&mut self, baseline: Baseline, options: WatchOptions, stop: StopSignal) -> WatchLoop<'_> {
        WatchLoop::new(self, baseline, options, stop)
    }

    /// One enumerate → fingerprint → diff → report pass.
    ///
    /// Fingerprints use the baseline's algorithm so digests stay comparable.
    pub(crate) fn scan_cycle(&mut self, baseline: &Baseline, cycle: u64) -> Result<(ScanReport, Snapshot)> {
        let started_at = Utc::now();
        if baseline.algorithm != self.config.algorithm {
            tracing::warn!(
                "Baseline uses {}, config asks for {}; scanning with {}",
                baseline.algorithm,
                self.config.algorithm,
                baseline.algorithm
            );
        }

        let (snapshot, issues) = self.capture(baseline.algorithm)?;
        let changes = diff(baseline, &snapshot, DiffOptions::from_config(&self.config));
        self.emit(&changes);

        let report = ScanReport {
            cycle,
            algorithm: baseline.algorithm,
            started_at,
            finished_at: Utc::now(),
            files_scanned: snapshot.len(),
            changes,
            issues,
        };

        let stats = report.stats();
        if stats.total() > 0 {
            let message = format!(
                "Changes detected: {} added, {} removed, {} modified",
                stats.added, stats.removed, stats.modified
            );
            tracing::warn!("{}", message);
            self.milestone(&message);
        } else {
            tracing::info!("No changes detected ({} files)", report.files_scanned);
            self.milestone("No changes detected");
        }

        Ok((report, snapshot))
    }

    fn milestone(&mut self, message: &str) {
        if let Err(e) = self.sink.milestone(message).and_then(|()| self.sink.flush()) {
            tracing::error!("Failed to record milestone: {}", e);
        }
    }

    // Sink failures are logged, never fatal
    fn emit(&mut self, changes: &ChangeSet) {
        for record in changes {
            if let Err(e) = self.sink.record(&ChangeEvent::from_record(record)) {
                tracing::error!("Failed to record change for {}: {}", record.path, e);
            }
        }
        if let Err(e) = self.sink.flush() {
            tracing::error!("Failed to flush change sink: {}", e);
        }
    }
}

fn build_pool(workers: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("fimwatch-hash-{i}"))
        .build()
        .map_err(|e| FimError::WorkerPool(e.to_string()))
}
