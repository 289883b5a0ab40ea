//! Configuration management for fimwatch
//!
//! A config document names the roots to monitor and the policy used while
//! walking and fingerprinting them. It is loaded once per invocation (or
//! once per watch cycle when reload is requested) and never mutated while a
//! scan is running.

use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::core::{Algorithm, PathMatcher};
use crate::error::{FimError, Result};

/// Environment variable overriding the digest algorithm
pub const ENV_ALGORITHM: &str = "FIMWATCH_ALGORITHM";
/// Environment variable overriding the fingerprint worker count
pub const ENV_WORKERS: &str = "FIMWATCH_WORKERS";

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Root paths, scanned in this order
    #[serde(alias = "roots")]
    pub paths: Vec<String>,
    /// Glob patterns excluded from every root
    #[serde(alias = "exclude")]
    pub excludes: Vec<String>,
    /// Digest algorithm used for new fingerprints
    pub algorithm: Algorithm,
    /// Descend into symlinked directories and hash symlinked files
    pub follow_symlinks: bool,
    /// Skip any entry whose relative path has a segment starting with `.`
    pub ignore_hidden: bool,
    /// Record and compare permission bits
    pub track_perms: bool,
    /// Report mtime drift even when content is unchanged
    pub strict_mtime: bool,
    /// Size of the fingerprint worker pool (defaults to available parallelism)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            excludes: Vec::new(),
            algorithm: Algorithm::default(),
            follow_symlinks: false,
            ignore_hidden: true,
            track_perms: false,
            strict_mtime: false,
            workers: None,
        }
    }
}

impl MonitorConfig {
    /// Load, apply environment overrides and validate a config file.
    ///
    /// Files ending in `.toml` are parsed as TOML, anything else as JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| FimError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let mut config = if is_toml {
            Self::from_toml(&raw)?
        } else {
            Self::from_json(&raw)?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse a JSON config document without validating it
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| FimError::ConfigInvalid(e.to_string()))
    }

    /// Parse a TOML config document without validating it
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| FimError::ConfigInvalid(e.to_string()))
    }

    /// Override fields from `FIMWATCH_*` environment variables.
    ///
    /// Unlike missing variables, malformed values are rejected.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var(ENV_ALGORITHM) {
            self.algorithm = val
                .parse()
                .map_err(|e| FimError::ConfigInvalid(format!("{ENV_ALGORITHM}: {e}")))?;
        }

        if let Ok(val) = std::env::var(ENV_WORKERS) {
            self.workers = Some(parse_workers(&val)?);
        }

        Ok(())
    }

    /// Validate configuration values before any filesystem work starts
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(FimError::ConfigInvalid(
                "at least one root path is required".to_string(),
            ));
        }

        if let Some(index) = self.paths.iter().position(|p| p.trim().is_empty()) {
            return Err(FimError::ConfigInvalid(format!(
                "root path #{} is empty",
                index + 1
            )));
        }

        if self.workers == Some(0) {
            return Err(FimError::ConfigInvalid(
                "workers must be greater than 0".to_string(),
            ));
        }

        // Compiling the matcher surfaces bad globs here rather than mid-scan
        PathMatcher::new(&self.excludes, self.ignore_hidden)?;

        Ok(())
    }

    /// Number of fingerprint workers to run
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Command-line switches layered over a loaded config.
///
/// Flags only ever turn a check on; they cannot disable what the file enables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub track_perms: bool,
    pub strict_mtime: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut MonitorConfig) {
        config.track_perms |= self.track_perms;
        config.strict_mtime |= self.strict_mtime;
    }
}

fn parse_workers(val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|_| {
        FimError::ConfigInvalid(format!("{ENV_WORKERS} must be a positive integer, got '{val}'"))
    })
}
