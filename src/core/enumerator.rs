use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ignore::WalkBuilder;

use super::filter::PathMatcher;
use super::summary::{IssueKind, ScanIssue};
use crate::config::MonitorConfig;
use crate::error::FimError;

/// A file eligible for fingerprinting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Normalized key used in baselines and change sets
    pub key: String,
    /// Location on disk
    pub path: PathBuf,
}

type Entry = std::result::Result<Candidate, ScanIssue>;

#[derive(Debug, Clone)]
struct Root {
    path: PathBuf,
    /// Prepended to keys when several roots are configured
    prefix: Option<String>,
}

impl Root {
    fn key_for(&self, relative: &str) -> String {
        match self.prefix.as_deref() {
            None | Some("") => relative.to_string(),
            Some(prefix) => format!("{prefix}/{relative}"),
        }
    }
}

/// Walks the configured roots in order and yields eligible files.
///
/// Directory entries are visited sorted by file name, so an unchanged tree
/// always produces the same sequence. Excluded and hidden directories are
/// pruned before descent.
pub struct Enumerator {
    roots: Vec<Root>,
    matcher: Arc<PathMatcher>,
    follow_symlinks: bool,
}

impl Enumerator {
    pub fn new(config: &MonitorConfig, matcher: Arc<PathMatcher>) -> Self {
        let multi = config.paths.len() > 1;
        let roots = config
            .paths
            .iter()
            .map(|configured| Root {
                path: PathBuf::from(configured),
                prefix: multi.then(|| normalize_root(configured)),
            })
            .collect();

        Self {
            roots,
            matcher,
            follow_symlinks: config.follow_symlinks,
        }
    }

    /// Lazily enumerate every root.
    ///
    /// When roots overlap, the first root to produce a key keeps it.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        let mut seen = HashSet::new();
        self.roots
            .iter()
            .flat_map(move |root| self.walk_root(root))
            .filter(move |entry| match entry {
                Ok(candidate) => {
                    let fresh = seen.insert(candidate.key.clone());
                    if !fresh {
                        tracing::debug!("Skipping {} (already seen under an earlier root)", candidate.key);
                    }
                    fresh
                }
                Err(_) => true,
            })
    }

    /// Drain [`Enumerator::iter`] into candidates and enumeration issues
    pub fn collect(&self) -> (Vec<Candidate>, Vec<ScanIssue>) {
        let mut candidates = Vec::new();
        let mut issues = Vec::new();
        for entry in self.iter() {
            match entry {
                Ok(candidate) => candidates.push(candidate),
                Err(issue) => {
                    tracing::warn!("Skipping {}: {}", issue.path, issue.detail);
                    issues.push(issue);
                }
            }
        }
        (candidates, issues)
    }

    fn walk_root<'a>(&'a self, root: &'a Root) -> Box<dyn Iterator<Item = Entry> + 'a> {
        let meta = match fs::metadata(&root.path) {
            Ok(meta) => meta,
            Err(err) => {
                let kind = match err.kind() {
                    ErrorKind::NotFound => IssueKind::Missing,
                    ErrorKind::PermissionDenied => IssueKind::PermissionDenied,
                    _ => IssueKind::Walk,
                };
                return Box::new(std::iter::once(Err(ScanIssue::new(
                    &root.path,
                    kind,
                    err.to_string(),
                ))));
            }
        };

        if meta.is_file() {
            return Box::new(self.file_root(root).into_iter().map(Ok));
        }

        let mut builder = WalkBuilder::new(&root.path);
        builder
            .standard_filters(false)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name(|a, b| a.cmp(b));

        let matcher = Arc::clone(&self.matcher);
        let root_path = root.path.clone();
        let visited = self.follow_symlinks.then(|| {
            let mut seen = HashSet::new();
            if let Ok(real) = root.path.canonicalize() {
                seen.insert(real);
            }
            Arc::new(Mutex::new(seen))
        });

        builder.filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Some(relative) = relative_key(&root_path, entry.path()) else {
                return true;
            };
            if matcher.is_excluded(&relative) {
                tracing::debug!("Excluded {}", relative);
                return false;
            }

            // Prune directories reached twice through links
            if let Some(visited) = &visited {
                if entry.file_type().is_some_and(|t| t.is_dir()) {
                    if let Ok(real) = entry.path().canonicalize() {
                        let mut seen = visited.lock().unwrap_or_else(PoisonError::into_inner);
                        if !seen.insert(real) {
                            tracing::debug!("Not descending into {} again", relative);
                            return false;
                        }
                    }
                }
            }
            true
        });

        let root_path = root.path.clone();
        Box::new(builder.build().filter_map(move |result| match result {
            Ok(entry) => {
                if entry.depth() == 0 {
                    return None;
                }
                let file_type = entry.file_type()?;
                if file_type.is_symlink() {
                    tracing::debug!("Skipping symlink {}", entry.path().display());
                    return None;
                }
                if !file_type.is_file() {
                    return None;
                }
                let relative = relative_key(&root_path, entry.path())?;
                Some(Ok(Candidate {
                    key: root.key_for(&relative),
                    path: entry.into_path(),
                }))
            }
            Err(err) => Some(Err(walk_issue(&err, None))),
        }))
    }

    // A root naming a single file is exempt from the hidden policy but not
    // from exclude patterns.
    fn file_root(&self, root: &Root) -> Option<Candidate> {
        let name = root.path.file_name()?.to_string_lossy().into_owned();
        if self.matcher.matches_pattern(&name) {
            tracing::debug!("Excluded root file {}", root.path.display());
            return None;
        }
        let key = match root.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => name,
        };
        Some(Candidate {
            key,
            path: root.path.clone(),
        })
    }
}

/// `path` relative to `root`, `/`-separated
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Check that `key` is a usable relative key: non-empty, not absolute and
/// free of `..` segments
pub fn check_key(key: &str) -> std::result::Result<(), &'static str> {
    if key.is_empty() {
        return Err("empty path key");
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err("absolute path key");
    }
    if key.split(['/', '\\']).any(|segment| segment == "..") {
        return Err("path key escapes its root");
    }
    Ok(())
}

/// Key prefix derived from a configured root.
///
/// The prefix is always relative: leading `/`, `.` segments and drive colons
/// are dropped, `..` is written as `__`.
fn normalize_root(configured: &str) -> String {
    let normalized = configured.replace('\\', "/");
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(|segment| match segment {
            ".." => "__",
            other => other.strip_suffix(':').unwrap_or(other),
        })
        .filter(|segment| !segment.is_empty())
        .collect();
    segments.join("/")
}

fn walk_issue(err: &ignore::Error, path: Option<&Path>) -> ScanIssue {
    match err {
        ignore::Error::WithPath { path, err } => walk_issue(err, Some(path.as_path())),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_issue(err, path)
        }
        ignore::Error::Loop { child, .. } => {
            ScanIssue::new(child, IssueKind::SymlinkLoop, err.to_string())
        }
        ignore::Error::Io(io) => {
            if let (ErrorKind::PermissionDenied, Some(path)) = (io.kind(), path) {
                // Subtree is skipped by the walker; only the directory is reported
                return ScanIssue::from_error(&FimError::PermissionDenied(path.to_path_buf()));
            }
            let kind = match io.kind() {
                ErrorKind::PermissionDenied => IssueKind::PermissionDenied,
                ErrorKind::NotFound => IssueKind::Missing,
                _ => IssueKind::Unreadable,
            };
            ScanIssue::new(path.unwrap_or_else(|| Path::new("")), kind, io.to_string())
        }
        other => ScanIssue::new(
            path.unwrap_or_else(|| Path::new("")),
            IssueKind::Walk,
            other.to_string(),
        ),
    }
}
