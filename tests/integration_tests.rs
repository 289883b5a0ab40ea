use std::fs;
use std::path::Path;
use tempfile::TempDir;
use fimwatch::core::check_key;
use fimwatch::{
    Algorithm, BaselineStore, ChangeKind, ChangeReason, FimError, Monitor, MonitorConfig, Outcome,
};

fn config_for(root: &Path) -> MonitorConfig {
    MonitorConfig {
        paths: vec![root.display().to_string()],
        workers: Some(2),
        ..Default::default()
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write test file");
}

#[test]
fn test_baseline_then_scan_reports_every_kind() {
    let tree = TempDir::new().expect("Failed to create temp dir");
    let state = TempDir::new().expect("Failed to create temp dir");
    let root = tree.path();

    write(root, "a.txt", "alpha");
    write(root, "b.txt", "bravo");
    write(root, "nested/c.txt", "charlie");

    let store = BaselineStore::new(state.path().join("baseline.json"));
    let mut monitor = Monitor::new(config_for(root)).expect("Failed to create monitor");
    let (baseline, issues) = monitor.write_baseline(&store).expect("Failed to write baseline");
    assert!(issues.is_empty());
    assert_eq!(baseline.len(), 3);

    write(root, "a.txt", "alpha, edited");
    fs::remove_file(root.join("b.txt")).unwrap();
    write(root, "nested/d.txt", "delta");

    let baseline = store.load().expect("Failed to load baseline");
    let report = monitor.scan(&baseline).expect("Scan failed");

    let summary: Vec<(&str, ChangeKind)> = report
        .changes
        .iter()
        .map(|r| (r.path.as_str(), r.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a.txt", ChangeKind::Modified),
            ("b.txt", ChangeKind::Removed),
            ("nested/d.txt", ChangeKind::Added),
        ]
    );
    assert_eq!(report.changes.records()[0].reason, Some(ChangeReason::Content));
    assert_eq!(report.outcome(), Outcome::ChangesFound);
    assert_eq!(report.outcome().exit_code(), 2);
}

#[test]
fn test_repeated_scans_are_clean() {
    let tree = TempDir::new().expect("Failed to create temp dir");
    write(tree.path(), "one.txt", "1");
    write(tree.path(), "deep/er/two.txt", "2");

    let mut monitor = Monitor::new(config_for(tree.path())).unwrap();
    let (baseline, _) = monitor.baseline().unwrap();

    for _ in 0..2 {
        let report = monitor.scan(&baseline).unwrap();
        assert!(report.changes.is_empty());
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.outcome(), Outcome::NoChanges);
    }
}

#[test]
fn test_excluded_and_hidden_files_never_reported() {
    let tree = TempDir::new().expect("Failed to create temp dir");
    let root = tree.path();
    write(root, "keep.txt", "k");
    write(root, "app.log", "log");
    write(root, "cache/blob.bin", "b");
    write(root, ".git/HEAD", "ref");

    let mut config = config_for(root);
    config.excludes = vec!["*.log".to_string(), "cache".to_string()];
    let mut monitor = Monitor::new(config).unwrap();
    let (baseline, _) = monitor.baseline().unwrap();

    let keys: Vec<&str> = baseline.entries.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["keep.txt"]);

    write(root, "other.log", "new log");
    write(root, "cache/more.bin", "m");
    write(root, ".git/ORIG_HEAD", "x");
    let report = monitor.scan(&baseline).unwrap();
    assert!(report.changes.is_empty());
}

#[test]
fn test_multiple_roots_are_prefixed() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(first.path(), "x.txt", "x");
    write(second.path(), "y.txt", "y");

    let config = MonitorConfig {
        paths: vec![
            first.path().display().to_string(),
            second.path().display().to_string(),
        ],
        ..Default::default()
    };
    let monitor = Monitor::new(config).unwrap();
    let (baseline, _) = monitor.baseline().unwrap();

    assert_eq!(baseline.len(), 2);
    assert!(baseline.entries.keys().any(|k| k.ends_with("/x.txt")));
    assert!(baseline.entries.keys().any(|k| k.ends_with("/y.txt")));
    for key in baseline.entries.keys() {
        assert!(!key.starts_with('/'), "{key} is absolute");
        assert!(check_key(key).is_ok());
    }
}

#[test]
fn test_multi_root_baseline_survives_reload() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(first.path(), "x.txt", "x");
    write(second.path(), "y.txt", "y");

    let config = MonitorConfig {
        paths: vec![
            first.path().display().to_string(),
            second.path().display().to_string(),
        ],
        ..Default::default()
    };
    let mut monitor = Monitor::new(config).unwrap();
    let store = BaselineStore::new(state.path().join("baseline.json"));
    let (written, _) = monitor.write_baseline(&store).unwrap();

    let loaded = store.load().expect("Relative multi-root keys must load");
    assert_eq!(loaded, written);
    assert!(monitor.scan(&loaded).unwrap().changes.is_empty());
}

#[test]
fn test_baseline_algorithm_is_persisted() {
    let tree = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(tree.path(), "f", "data");

    let mut config = config_for(tree.path());
    config.algorithm = Algorithm::Blake3;
    let mut monitor = Monitor::new(config).unwrap();
    let store = BaselineStore::new(state.path().join("b.json"));
    monitor.write_baseline(&store).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.algorithm, Algorithm::Blake3);
    assert_eq!(loaded.get("f").unwrap().digest.len(), 64);
}

#[test]
fn test_scan_without_baseline_is_an_error() {
    let state = TempDir::new().unwrap();
    let store = BaselineStore::new(state.path().join("missing.json"));
    let err = store.load().unwrap_err();
    assert!(matches!(err, FimError::BaselineMissing(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_missing_root_is_an_issue_not_an_error() {
    let tree = TempDir::new().unwrap();
    write(tree.path(), "a", "a");

    let config = MonitorConfig {
        paths: vec![
            tree.path().display().to_string(),
            tree.path().join("gone").display().to_string(),
        ],
        ..Default::default()
    };
    let mut monitor = Monitor::new(config).unwrap();
    let (baseline, issues) = monitor.baseline().unwrap();
    assert_eq!(issues.len(), 1);

    let report = monitor.scan(&baseline).unwrap();
    assert!(report.has_issues());
    assert_eq!(report.outcome(), Outcome::NoChanges);
}

#[cfg(unix)]
#[test]
fn test_permission_only_change() {
    use std::os::unix::fs::PermissionsExt;

    let tree = TempDir::new().unwrap();
    let file = tree.path().join("script.sh");
    fs::write(&file, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

    let mut untracked = Monitor::new(config_for(tree.path())).unwrap();
    let mut tracked_config = config_for(tree.path());
    tracked_config.track_perms = true;
    let mut tracked = Monitor::new(tracked_config).unwrap();

    let (plain_baseline, _) = untracked.baseline().unwrap();
    let (perm_baseline, _) = tracked.baseline().unwrap();

    fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(untracked.scan(&plain_baseline).unwrap().changes.is_empty());

    let report = tracked.scan(&perm_baseline).unwrap();
    assert_eq!(report.changes.len(), 1);
    let record = &report.changes.records()[0];
    assert_eq!(record.kind, ChangeKind::Modified);
    assert_eq!(record.reason, Some(ChangeReason::Permissions));
    assert_eq!(record.detail().as_deref(), Some("permissions (644 -> 755)"));
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_keeps_outcome_clean() {
    use std::os::unix::fs::PermissionsExt;

    let tree = TempDir::new().unwrap();
    write(tree.path(), "ok.txt", "fine");
    write(tree.path(), "private/inner.txt", "hidden from us");
    let private = tree.path().join("private");
    fs::set_permissions(&private, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can list regardless of mode
    if fs::read_dir(&private).is_ok() {
        fs::set_permissions(&private, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let mut monitor = Monitor::new(config_for(tree.path())).unwrap();
    let (baseline, issues) = monitor.baseline().unwrap();
    let report = monitor.scan(&baseline).unwrap();
    fs::set_permissions(&private, fs::Permissions::from_mode(0o755)).unwrap();

    let keys: Vec<&str> = baseline.entries.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["ok.txt"]);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, fimwatch::IssueKind::PermissionDenied);
    assert_eq!(report.issues.len(), 1);
    assert!(report.changes.is_empty());
    assert_eq!(report.outcome(), Outcome::NoChanges);
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_an_issue() {
    use std::os::unix::fs::PermissionsExt;

    let tree = TempDir::new().unwrap();
    write(tree.path(), "ok.txt", "fine");
    let locked = tree.path().join("locked.txt");
    fs::write(&locked, "secret").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can read regardless of mode
    if fs::File::open(&locked).is_ok() {
        return;
    }

    let monitor = Monitor::new(config_for(tree.path())).unwrap();
    let (baseline, issues) = monitor.baseline().unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    assert_eq!(baseline.len(), 1);
    assert!(baseline.get("locked.txt").is_none());
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, fimwatch::IssueKind::Unreadable);
}
