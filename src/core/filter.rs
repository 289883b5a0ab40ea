use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use crate::error::{FimError, Result};

/// Decides which paths below a root are left out of a snapshot.
///
/// Paths are given relative to their root, `/`-separated. Patterns without a
/// `/` are tested against each segment on its own; patterns with a `/` are
/// anchored at the root and tested against every ancestor prefix, so a match
/// on a directory covers its whole subtree.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    segment_globs: GlobSet,
    anchored_globs: GlobSet,
    ignore_hidden: bool,
}

impl PathMatcher {
    pub fn new(patterns: &[String], ignore_hidden: bool) -> Result<Self> {
        let mut segment = GlobSetBuilder::new();
        let mut anchored = GlobSetBuilder::new();

        for pattern in patterns {
            let is_anchored = pattern.contains('/');
            let trimmed = pattern.trim_matches('/');
            if trimmed.is_empty() {
                return Err(FimError::ConfigInvalid(format!(
                    "Invalid exclude pattern '{}': pattern is empty",
                    pattern
                )));
            }

            // `*` must stay inside one segment
            let glob = GlobBuilder::new(trimmed)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    FimError::ConfigInvalid(format!("Invalid exclude pattern '{}': {}", pattern, e))
                })?;

            if is_anchored {
                anchored.add(glob);
            } else {
                segment.add(glob);
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder
                .build()
                .map_err(|e| FimError::ConfigInvalid(format!("Failed to build glob set: {}", e)))
        };

        Ok(Self {
            segment_globs: build(segment)?,
            anchored_globs: build(anchored)?,
            ignore_hidden,
        })
    }

    /// Whether `relative` (a path below a root) is left out of snapshots
    pub fn is_excluded(&self, relative: &str) -> bool {
        if relative.is_empty() {
            return false;
        }
        if self.ignore_hidden && is_hidden(relative) {
            return true;
        }
        self.matches_pattern(relative)
    }

    /// Whether an exclude pattern matches `relative` or one of its ancestors
    pub fn matches_pattern(&self, relative: &str) -> bool {
        if relative
            .split('/')
            .any(|segment| self.segment_globs.is_match(segment))
        {
            return true;
        }

        if self.anchored_globs.is_empty() {
            return false;
        }

        let ancestors = relative
            .match_indices('/')
            .map(|(idx, _)| &relative[..idx])
            .chain(std::iter::once(relative));
        for prefix in ancestors {
            if self.anchored_globs.is_match(prefix) {
                return true;
            }
        }
        false
    }
}

/// Whether any segment of a relative path starts with `.`
pub fn is_hidden(relative: &str) -> bool {
    relative
        .split('/')
        .any(|segment| segment.starts_with('.') && segment != "." && segment != "..")
}
