use anyhow::{Context, Result};
use clap::Parser;

use fimwatch::{
    cli::{Cli, Command},
    core::{FanoutSink, JsonLinesSink, TracingSink},
    Baseline, BaselineStore, ChangeKind, Monitor, MonitorConfig, Outcome, ScanIssue, ScanReport,
    StopSignal,
};

fn main() {
    let cli = Cli::parse();
    cli.setup_logging();

    let code = match run(&cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            Outcome::Error.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<Outcome> {
    let mut config = MonitorConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    cli.overrides().apply(&mut config);

    let mut sink = FanoutSink::new().with(Box::new(TracingSink));
    if let Some(path) = &cli.log_file {
        let log = JsonLinesSink::append_to(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        sink = sink.with(Box::new(log));
    }

    let mut monitor = Monitor::new(config)
        .context("Invalid monitor configuration")?
        .with_sink(Box::new(sink));
    let store = BaselineStore::new(&cli.baseline);

    match &cli.command {
        Command::Baseline => run_baseline(cli, &mut monitor, &store),
        Command::Scan => {
            let baseline = load_baseline(&store)?;
            let report = monitor.scan(&baseline).context("Scan failed")?;
            print_report(cli, &report)?;
            Ok(report.outcome())
        }
        Command::Watch { .. } => {
            let baseline = load_baseline(&store)?;
            run_watch(cli, &mut monitor, baseline)
        }
    }
}

fn load_baseline(store: &BaselineStore) -> Result<Baseline> {
    store
        .load()
        .with_context(|| format!("Failed to load baseline {}", store.path().display()))
}

fn run_baseline(cli: &Cli, monitor: &mut Monitor, store: &BaselineStore) -> Result<Outcome> {
    let (baseline, issues) = monitor
        .write_baseline(store)
        .context("Failed to create baseline")?;

    if cli.json {
        let summary = serde_json::json!({
            "baseline": store.path(),
            "algorithm": baseline.algorithm,
            "files": baseline.len(),
            "issues": issues,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Baseline written to {} ({} files)",
            store.path().display(),
            baseline.len()
        );
        print_issues(cli, &issues);
    }
    Ok(Outcome::NoChanges)
}

fn run_watch(cli: &Cli, monitor: &mut Monitor, baseline: Baseline) -> Result<Outcome> {
    let options = cli
        .watch_options()
        .context("Watch options requested outside the watch command")?;

    let stop = StopSignal::new();
    let handler = stop.clone();
    ctrlc::set_handler(move || handler.stop()).context("Failed to install Ctrl+C handler")?;

    if !cli.json {
        println!("Watching every {}s (Ctrl+C to stop)", options.interval().as_secs());
    }

    let mut print_err = None;
    let outcome = monitor
        .watch(baseline, options, stop.clone())
        .run(|report| {
            if let Err(e) = print_cycle(cli, report) {
                print_err.get_or_insert(e);
                stop.stop();
            }
        })
        .context("Watch failed")?;

    if let Some(e) = print_err {
        return Err(e);
    }
    Ok(outcome)
}

fn print_cycle(cli: &Cli, report: &ScanReport) -> Result<()> {
    if cli.json {
        // One report per line so the stream can be consumed incrementally
        println!("{}", serde_json::to_string(report)?);
    } else if report.changes.is_empty() && !report.has_issues() {
        use std::io::Write;
        print!(".");
        std::io::stdout().flush()?;
    } else {
        println!();
        println!(
            "[{}] cycle {}",
            report.finished_at.format("%Y-%m-%d %H:%M:%S"),
            report.cycle
        );
        print_text_report(cli, report);
    }
    Ok(())
}

fn print_report(cli: &Cli, report: &ScanReport) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_text_report(cli, report);
    }
    Ok(())
}

fn print_text_report(cli: &Cli, report: &ScanReport) {
    if report.changes.is_empty() {
        println!("No changes ({} files scanned)", report.files_scanned);
    }

    for (kind, title) in [
        (ChangeKind::Added, "ADDED"),
        (ChangeKind::Removed, "REMOVED"),
        (ChangeKind::Modified, "MODIFIED"),
    ] {
        let records: Vec<_> = report.changes.of_kind(kind).collect();
        if records.is_empty() {
            continue;
        }

        println!("{}", paint(cli, kind_color(kind), &format!("{} ({})", title, records.len())));
        for record in records {
            match record.detail() {
                Some(detail) => println!("  {}  [{}]", record.path, detail),
                None => println!("  {}", record.path),
            }
        }
    }

    print_issues(cli, &report.issues);
}

fn print_issues(cli: &Cli, issues: &[ScanIssue]) {
    if issues.is_empty() {
        return;
    }
    println!("{}", paint(cli, "\x1b[35m", &format!("ISSUES ({})", issues.len())));
    for issue in issues {
        println!("  {}: {}", issue.path, issue.detail);
    }
}

fn kind_color(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "\x1b[32m",    // Green
        ChangeKind::Removed => "\x1b[31m",  // Red
        ChangeKind::Modified => "\x1b[33m", // Yellow
    }
}

fn paint(cli: &Cli, color: &str, text: &str) -> String {
    if cli.no_color {
        text.to_string()
    } else {
        format!("{}{}\x1b[0m", color, text)
    }
}
