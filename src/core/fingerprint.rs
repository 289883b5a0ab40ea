//! Per-file fingerprinting
//!
//! A fingerprint is a content digest plus the metadata observed on the same
//! open handle. Content is streamed as raw bytes; nothing is decoded.

use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::{FimError, Result};

const CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB
const MAX_ATTEMPTS: usize = 3;

/// Supported digest functions. The set is closed: anything else is rejected
/// while the config is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha512,
        Algorithm::Blake3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
            Algorithm::Blake3 => "blake3",
        }
    }

    /// Length of a hex digest produced by this algorithm
    pub fn hex_len(self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Sha1 => 40,
            Algorithm::Sha256 | Algorithm::Blake3 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    /// Whether `digest` has the shape of a lowercase hex digest of this algorithm
    pub fn is_valid_digest(self, digest: &str) -> bool {
        digest.len() == self.hex_len()
            && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    fn hasher(self) -> StreamHasher {
        match self {
            Algorithm::Md5 => StreamHasher::Md5(md5::Md5::new()),
            Algorithm::Sha1 => StreamHasher::Sha1(sha1::Sha1::new()),
            Algorithm::Sha256 => StreamHasher::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => StreamHasher::Sha512(sha2::Sha512::new()),
            Algorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Algorithm::ALL.iter().map(|a| a.name()).collect();
                format!("unsupported hash algorithm '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

enum StreamHasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamHasher::Md5(h) => h.update(bytes),
            StreamHasher::Sha1(h) => h.update(bytes),
            StreamHasher::Sha256(h) => h.update(bytes),
            StreamHasher::Sha512(h) => h.update(bytes),
            StreamHasher::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Md5(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha1(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha256(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha512(h) => format!("{:x}", h.finalize()),
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hex digest of an in-memory buffer
pub fn digest_bytes(algorithm: Algorithm, bytes: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Digest and metadata of one file at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Normalized key; stored as the map key when persisted
    #[serde(skip)]
    pub path: String,
    pub digest: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    /// Permission bits, only recorded when permission tracking is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

/// Computes fingerprints with one algorithm
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    algorithm: Algorithm,
    track_perms: bool,
}

impl Fingerprinter {
    pub fn new(algorithm: Algorithm, track_perms: bool) -> Self {
        Self {
            algorithm,
            track_perms,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Fingerprint the file at `path`, recording it under `key`.
    ///
    /// Size, mtime and mode come from the handle being read. A file that is
    /// missing when opened, or whose name no longer resolves once the read is
    /// done, yields [`FimError::FileVanished`]. A file that keeps changing
    /// underneath the read is retried, then reported as unreadable.
    pub fn fingerprint(&self, key: &str, path: &Path) -> Result<FileFingerprint> {
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(fingerprint) = self.hash_once(key, path)? {
                return Ok(fingerprint);
            }
            tracing::debug!("{} changed while hashing (attempt {})", path.display(), attempt);
        }
        Err(FimError::FileUnreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                ErrorKind::Other,
                format!("file kept changing while being read ({MAX_ATTEMPTS} attempts)"),
            ),
        })
    }

    // `None` when the handle's size or mtime moved during the read
    fn hash_once(&self, key: &str, path: &Path) -> Result<Option<FileFingerprint>> {
        let mut file = File::open(path).map_err(|e| classify_io(path, e))?;
        let meta = file.metadata().map_err(|e| classify_io(path, e))?;
        let before = Observed::from_metadata(&meta);

        let mut hasher = self.algorithm.hasher();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_io(path, e)),
            };
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        let after = file.metadata().map_err(|e| classify_io(path, e))?;
        if !before.unchanged(&Observed::from_metadata(&after), total) {
            return Ok(None);
        }

        // The open handle outlives an unlink; check the name is still there
        if let Err(e) = fs::metadata(path) {
            if e.kind() == ErrorKind::NotFound {
                return Err(FimError::FileVanished(path.to_path_buf()));
            }
        }

        let mtime = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|source| FimError::FileUnreadable {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Some(FileFingerprint {
            path: key.to_string(),
            digest: hasher.finalize_hex(),
            size: meta.len(),
            mtime,
            mode: self.track_perms.then(|| permission_bits(&meta)),
        }))
    }
}

/// Size and mtime seen on a handle at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    len: u64,
    modified: Option<SystemTime>,
}

impl Observed {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }

    fn unchanged(&self, after: &Observed, bytes_read: u64) -> bool {
        self == after && self.len == bytes_read
    }
}

fn classify_io(path: &Path, source: std::io::Error) -> FimError {
    if source.kind() == ErrorKind::NotFound {
        FimError::FileVanished(path.to_path_buf())
    } else {
        FimError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}
