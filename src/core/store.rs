//! Baseline persistence
//!
//! The persisted document is versioned JSON:
//!
//! ```json
//! {
//!   "version": 1,
//!   "algorithm": "sha256",
//!   "created_at": "2024-05-01T10:00:00Z",
//!   "entries": {
//!     "etc/hosts": { "digest": "…", "size": 220, "mtime": "…", "mode": 420 }
//!   }
//! }
//! ```
//!
//! Documents are rejected rather than guessed at: a missing or newer
//! `version` is [`FimError::UnsupportedBaselineVersion`], anything that does
//! not parse or breaks the structural rules is [`FimError::BaselineCorrupt`].

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::enumerator::check_key;
use super::fingerprint::{Algorithm, FileFingerprint};
use super::snapshot::{Baseline, FileMap};
use crate::error::{FimError, Result};

/// Format version written by this build
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    algorithm: Algorithm,
    created_at: &'a DateTime<Utc>,
    entries: &'a FileMap,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: Option<u32>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[allow(dead_code)]
    version: u32,
    algorithm: String,
    created_at: DateTime<Utc>,
    entries: EntryList,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredEntry {
    digest: String,
    size: u64,
    mtime: DateTime<Utc>,
    #[serde(default)]
    mode: Option<u32>,
}

impl StoredEntry {
    fn into_fingerprint(self, path: String) -> FileFingerprint {
        FileFingerprint {
            path,
            digest: self.digest,
            size: self.size,
            mtime: self.mtime,
            mode: self.mode,
        }
    }
}

/// Entries in document order, duplicates kept so they can be reported
struct EntryList(Vec<(String, StoredEntry)>);

impl<'de> Deserialize<'de> for EntryList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = EntryList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of path to fingerprint")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<EntryList, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((path, entry)) = map.next_entry::<String, StoredEntry>()? {
                    entries.push((path, entry));
                }
                Ok(EntryList(entries))
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Reads and writes one baseline file
#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace the persisted baseline.
    ///
    /// Written to a sibling temp file first and renamed into place, so a
    /// reader never sees a half-written document.
    pub fn save(&self, baseline: &Baseline) -> Result<()> {
        let write_err = |source| FimError::BaselineWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let document = DocumentRef {
            version: FORMAT_VERSION,
            algorithm: baseline.algorithm,
            created_at: &baseline.created_at,
            entries: &baseline.entries,
        };

        let written = write_document(&tmp, &document).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(source) = written {
            if let Err(e) = fs::remove_file(&tmp) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", tmp.display(), e);
                }
            }
            return Err(write_err(source));
        }

        tracing::info!(
            "Wrote baseline to {} ({} files)",
            self.path.display(),
            baseline.len()
        );
        Ok(())
    }

    /// Load and validate the persisted baseline
    pub fn load(&self) -> Result<Baseline> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FimError::BaselineMissing(self.path.clone()))
            }
            Err(source) => {
                return Err(FimError::BaselineRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let baseline = self.parse(&raw)?;
        tracing::debug!(
            "Loaded baseline {} ({} files, {})",
            self.path.display(),
            baseline.len(),
            baseline.algorithm
        );
        Ok(baseline)
    }

    fn parse(&self, raw: &str) -> Result<Baseline> {
        let header: VersionHeader =
            serde_json::from_str(raw).map_err(|e| self.corrupt(e.to_string()))?;

        match header.version {
            Some(FORMAT_VERSION) => {}
            // Pre-versioned documents are the old flat path → {hash, size, mtime} layout
            found => {
                return Err(FimError::UnsupportedBaselineVersion {
                    path: self.path.clone(),
                    found: found.unwrap_or(0),
                    supported: FORMAT_VERSION,
                })
            }
        }

        let document: Document =
            serde_json::from_str(raw).map_err(|e| self.corrupt(e.to_string()))?;

        let algorithm: Algorithm = document
            .algorithm
            .parse()
            .map_err(|e: String| self.corrupt(e))?;

        let mut baseline = Baseline::new(algorithm, document.created_at);
        for (path, entry) in document.entries.0 {
            if let Err(reason) = check_key(&path) {
                return Err(self.corrupt(format!("{reason} '{path}'")));
            }
            if !algorithm.is_valid_digest(&entry.digest) {
                return Err(self.corrupt(format!(
                    "'{}' has a malformed {} digest",
                    path, algorithm
                )));
            }
            if let Some(previous) = baseline.insert(entry.into_fingerprint(path)) {
                return Err(self.corrupt(format!("duplicate path '{}'", previous.path)));
            }
        }

        Ok(baseline)
    }

    fn corrupt(&self, reason: String) -> FimError {
        FimError::BaselineCorrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

fn write_document(path: &Path, document: &DocumentRef<'_>) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.write_all(b"\n")?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::digest_bytes;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> Baseline {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut baseline = Baseline::new(Algorithm::Sha256, created);
        baseline.insert(FileFingerprint {
            path: "a.txt".into(),
            digest: digest_bytes(Algorithm::Sha256, b"a"),
            size: 1,
            mtime: Utc.timestamp_opt(1_714_557_600, 123_456_789).unwrap(),
            mode: Some(0o644),
        });
        baseline.insert(FileFingerprint {
            path: "dir/b.bin".into(),
            digest: digest_bytes(Algorithm::Sha256, b""),
            size: 0,
            mtime: created,
            mode: None,
        });
        baseline
    }

    fn store(dir: &TempDir) -> BaselineStore {
        BaselineStore::new(dir.path().join("state/baseline.json"))
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let baseline = sample();

        store.save(&baseline).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), baseline);
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&sample()).unwrap();

        let empty = Baseline::new(Algorithm::Md5, Utc::now());
        store.save(&empty).unwrap();
        assert_eq!(store.load().unwrap(), empty);
    }

    #[test]
    fn test_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(store(&dir).load(), Err(FimError::BaselineMissing(_))));
    }

    fn load_raw(raw: &str) -> Result<Baseline> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baseline.json");
        fs::write(&path, raw).unwrap();
        BaselineStore::new(path).load()
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(load_raw("not json"), Err(FimError::BaselineCorrupt { .. })));
        assert!(matches!(load_raw("[1, 2]"), Err(FimError::BaselineCorrupt { .. })));
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let digest = digest_bytes(Algorithm::Md5, b"x");
        let raw = format!(
            r#"{{"version":1,"algorithm":"md5","created_at":"2024-05-01T10:00:00Z","entries":{{
                "a":{{"digest":"{d}","size":1,"mtime":"2024-05-01T10:00:00Z"}},
                "a":{{"digest":"{d}","size":1,"mtime":"2024-05-01T10:00:00Z"}}}}}}"#,
            d = digest
        );
        match load_raw(&raw) {
            Err(FimError::BaselineCorrupt { reason, .. }) => assert!(reason.contains("duplicate")),
            other => panic!("expected corrupt baseline, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let raw = r#"{"version":1,"algorithm":"crc32","created_at":"2024-05-01T10:00:00Z","entries":{}}"#;
        assert!(matches!(load_raw(raw), Err(FimError::BaselineCorrupt { .. })));
    }

    #[test]
    fn test_malformed_digest_rejected() {
        let raw = r#"{"version":1,"algorithm":"sha256","created_at":"2024-05-01T10:00:00Z",
            "entries":{"a":{"digest":"abc","size":1,"mtime":"2024-05-01T10:00:00Z"}}}"#;
        assert!(matches!(load_raw(raw), Err(FimError::BaselineCorrupt { .. })));
    }

    #[test]
    fn test_escaping_keys_rejected() {
        let digest = digest_bytes(Algorithm::Md5, b"x");
        for key in ["/etc/passwd", "../escape", "a/../../b"] {
            let raw = format!(
                r#"{{"version":1,"algorithm":"md5","created_at":"2024-05-01T10:00:00Z","entries":{{
                    "{key}":{{"digest":"{digest}","size":1,"mtime":"2024-05-01T10:00:00Z"}}}}}}"#
            );
            assert!(
                matches!(load_raw(&raw), Err(FimError::BaselineCorrupt { .. })),
                "{key} was accepted"
            );
        }
    }

    #[test]
    fn test_unknown_entry_field_rejected() {
        let digest = digest_bytes(Algorithm::Md5, b"x");
        let raw = format!(
            r#"{{"version":1,"algorithm":"md5","created_at":"2024-05-01T10:00:00Z","entries":{{
                "a":{{"digest":"{digest}","size":1,"mtime":"2024-05-01T10:00:00Z","hash":"00"}}}}}}"#
        );
        assert!(matches!(load_raw(&raw), Err(FimError::BaselineCorrupt { .. })));
    }

    #[test]
    fn test_unreadable_baseline_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path());
        assert!(matches!(store.load(), Err(FimError::BaselineRead { .. })));
    }

    #[test]
    fn test_failed_save_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("baseline.json");
        fs::create_dir_all(target.join("occupied")).unwrap();

        let store = BaselineStore::new(&target);
        assert!(matches!(store.save(&sample()), Err(FimError::BaselineWrite { .. })));
        assert!(!dir.path().join("baseline.json.tmp").exists());
        assert!(target.join("occupied").is_dir());
    }

    #[test]
    fn test_legacy_and_future_versions() {
        let legacy = r#"{"/etc/hosts":{"hash":"00","size":1,"mtime":1.5,"mode":null}}"#;
        match load_raw(legacy) {
            Err(FimError::UnsupportedBaselineVersion { found, supported, .. }) => {
                assert_eq!(found, 0);
                assert_eq!(supported, FORMAT_VERSION);
            }
            other => panic!("expected unsupported version, got {:?}", other),
        }

        let future = r#"{"version":2,"algorithm":"sha256","created_at":"2024-05-01T10:00:00Z","entries":{}}"#;
        assert!(matches!(
            load_raw(future),
            Err(FimError::UnsupportedBaselineVersion { found: 2, .. })
        ));
    }
}
