use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};

use crate::config::ConfigOverrides;
use crate::core::{BaselinePolicy, WatchOptions};

#[derive(Parser)]
#[command(name = "fimwatch")]
#[command(version)]
#[command(about = "File integrity monitor: baseline, scan and watch directory trees for changes")]
#[command(long_about = "fimwatch fingerprints every file under the configured roots, stores the result as a baseline, and reports files that were added, removed or modified since. Exit code 0 means no changes, 2 means changes were found, 1 means an error.")]
pub struct Cli {
    /// Monitor configuration (JSON, or TOML when the name ends in .toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Where the baseline is stored
    #[arg(short, long, value_name = "FILE")]
    pub baseline: PathBuf,

    /// Append every detected change to this file as JSON lines
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,

    /// Report mtime drift even when content is unchanged
    #[arg(long)]
    pub strict_mtime: bool,

    /// Record and compare permission bits
    #[arg(long)]
    pub track_perms: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Fingerprint the configured roots and save the result as the baseline
    Baseline,
    /// Compare the current state against the saved baseline once
    Scan,
    /// Scan repeatedly until interrupted
    Watch {
        /// Seconds between cycles
        #[arg(short, long, default_value = "15")]
        interval: u64,

        /// Compare each cycle against the previous changed state instead of the saved baseline
        #[arg(long)]
        roll_forward: bool,

        /// Re-read the config file before every cycle
        #[arg(long)]
        reload_config: bool,
    },
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            track_perms: self.track_perms,
            strict_mtime: self.strict_mtime,
        }
    }

    /// Watch options for the `watch` subcommand, `None` for the others
    pub fn watch_options(&self) -> Option<WatchOptions> {
        let Command::Watch { interval, roll_forward, reload_config } = &self.command else {
            return None;
        };

        let policy = if *roll_forward {
            BaselinePolicy::RollForward
        } else {
            BaselinePolicy::Static
        };
        let mut options = WatchOptions::new(Duration::from_secs(*interval)).with_policy(policy);
        if *reload_config {
            options = options.with_config_reload(self.config.clone(), self.overrides());
        }
        Some(options)
    }

    /// Log to stderr so stdout carries only reports
    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(!self.no_color)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}
