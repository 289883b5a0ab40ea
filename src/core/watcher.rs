use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::snapshot::Baseline;
use super::summary::{Outcome, ScanReport};
use crate::config::{ConfigOverrides, MonitorConfig};
use crate::error::Result;
use crate::monitor::Monitor;

/// Shortest allowed pause between cycles
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between cycles when none is given
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// What each watch cycle is compared against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaselinePolicy {
    /// Always the baseline the watch started with
    #[default]
    Static,
    /// The snapshot of the last cycle that reported changes
    RollForward,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    interval: Duration,
    pub policy: BaselinePolicy,
    /// Re-read this config file at the start of every cycle
    pub reload_config: Option<PathBuf>,
    /// Applied to every reloaded config
    pub overrides: ConfigOverrides,
}

impl WatchOptions {
    /// Options with `interval` raised to [`MIN_INTERVAL`] if shorter
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: clamp_interval(interval),
            policy: BaselinePolicy::Static,
            reload_config: None,
            overrides: ConfigOverrides::default(),
        }
    }

    pub fn with_policy(mut self, policy: BaselinePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config_reload(mut self, path: PathBuf, overrides: ConfigOverrides) -> Self {
        self.reload_config = Some(path);
        self.overrides = overrides;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        tracing::warn!(
            "Watch interval {:?} is below the {:?} minimum; using {:?}",
            interval,
            MIN_INTERVAL,
            MIN_INTERVAL
        );
        MIN_INTERVAL
    } else {
        interval
    }
}

/// Cancellation flag shared between a watch loop and whoever stops it.
///
/// Stopping wakes a sleeping loop immediately.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` unless stopped first. Returns whether stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Scanning,
    Sleeping,
    Stopped,
}

/// Polling watch: scan, report, sleep, repeat.
///
/// Iterating yields one [`ScanReport`] per cycle. Iteration ends once the
/// stop signal fires; a fatal error is yielded once and ends it as well.
pub struct WatchLoop<'m> {
    monitor: &'m mut Monitor,
    baseline: Baseline,
    rolled: Option<Baseline>,
    options: WatchOptions,
    stop: StopSignal,
    state: WatchState,
    cycle: u64,
}

impl<'m> WatchLoop<'m> {
    pub fn new(monitor: &'m mut Monitor, baseline: Baseline, options: WatchOptions, stop: StopSignal) -> Self {
        Self {
            monitor,
            baseline,
            rolled: None,
            options,
            stop,
            state: WatchState::Idle,
            cycle: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Baseline the next cycle will be compared against
    pub fn comparison_baseline(&self) -> &Baseline {
        self.rolled.as_ref().unwrap_or(&self.baseline)
    }

    /// Drive the loop to completion, handing each report to `on_cycle`.
    ///
    /// Returns the merged outcome of all cycles, or the fatal error that
    /// stopped the loop.
    pub fn run<F: FnMut(&ScanReport)>(mut self, mut on_cycle: F) -> Result<Outcome> {
        let mut outcome = Outcome::NoChanges;
        while let Some(result) = self.next() {
            let report = result?;
            outcome = outcome.merge(report.outcome());
            on_cycle(&report);
        }
        Ok(outcome)
    }

    fn run_cycle(&mut self) -> Result<ScanReport> {
        if let Some(path) = &self.options.reload_config {
            let mut config = MonitorConfig::load(path)?;
            self.options.overrides.apply(&mut config);
            self.monitor.reload(config)?;
        }

        let comparison = self.rolled.as_ref().unwrap_or(&self.baseline);
        let (report, snapshot) = self.monitor.scan_cycle(comparison, self.cycle)?;

        if self.options.policy == BaselinePolicy::RollForward && !report.changes.is_empty() {
            tracing::debug!("Rolling comparison baseline forward after cycle {}", self.cycle);
            self.rolled = Some(Baseline::from(snapshot));
        }
        Ok(report)
    }

    fn halt(&mut self) {
        if self.state != WatchState::Stopped {
            tracing::info!("Watch stopped after {} cycles", self.cycle);
        }
        self.state = WatchState::Stopped;
    }
}

impl Iterator for WatchLoop<'_> {
    type Item = Result<ScanReport>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == WatchState::Stopped {
            return None;
        }
        if self.stop.is_stopped() {
            self.halt();
            return None;
        }

        if self.state == WatchState::Sleeping && self.stop.wait_timeout(self.options.interval) {
            self.halt();
            return None;
        }

        self.state = WatchState::Scanning;
        self.cycle += 1;
        tracing::debug!("Watch cycle {} started", self.cycle);

        match self.run_cycle() {
            Ok(report) => {
                self.state = WatchState::Sleeping;
                Some(Ok(report))
            }
            Err(err) => {
                tracing::error!("Watch cycle {} failed: {}", self.cycle, err);
                self.halt();
                Some(Err(err))
            }
        }
    }
}
