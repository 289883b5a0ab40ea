use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diff::{ChangeKind, ChangeRecord};

/// One detected change, as handed to a [`ChangeSink`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ChangeEvent {
    pub fn new(path: String, kind: ChangeKind) -> Self {
        Self {
            timestamp: Utc::now(),
            path,
            kind,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn from_record(record: &ChangeRecord) -> Self {
        let event = Self::new(record.path.clone(), record.kind);
        match record.detail() {
            Some(detail) => event.with_detail(detail),
            None => event,
        }
    }
}

/// Size at which a change log is rotated
pub const LOG_MAX_BYTES: u64 = 1_000_000;
/// Rotated change logs kept next to the live one
pub const LOG_BACKUPS: usize = 3;

/// A run-level log line such as "Baseline created ..."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Append-only destination for change events.
///
/// Where and how events are stored is up to the implementation; the engine
/// only appends.
pub trait ChangeSink: Send {
    fn record(&mut self, event: &ChangeEvent) -> io::Result<()>;

    /// Run-level progress line. Ignored unless the sink keeps a log.
    fn milestone(&mut self, _message: &str) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Emits every change as a structured `tracing` event.
///
/// Milestones are not repeated here; the engine already logs them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ChangeSink for TracingSink {
    fn record(&mut self, event: &ChangeEvent) -> io::Result<()> {
        tracing::warn!(
            path = %event.path,
            kind = %event.kind,
            detail = event.detail.as_deref().unwrap_or(""),
            "Change detected"
        );
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    // One write per line so a rotation never splits it
    fn write_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.writer.write_all(&line)
    }
}

impl JsonLinesSink<RotatingFile> {
    /// Append to `path`, rotating at [`LOG_MAX_BYTES`] and keeping
    /// [`LOG_BACKUPS`] old files
    pub fn append_to<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(RotatingFile::open(path, LOG_MAX_BYTES, LOG_BACKUPS)?))
    }
}

impl<W: Write + Send> ChangeSink for JsonLinesSink<W> {
    fn record(&mut self, event: &ChangeEvent) -> io::Result<()> {
        self.write_line(event)
    }

    fn milestone(&mut self, message: &str) -> io::Result<()> {
        self.write_line(&Milestone {
            timestamp: Utc::now(),
            message: message.to_string(),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Append-only file that is rotated to `<path>.1`, `<path>.2`, ... once a
/// write would take it past `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    writer: BufWriter<File>,
    written: u64,
}

impl RotatingFile {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open<P: AsRef<Path>>(path: P, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            writer: BufWriter::new(file),
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        if self.backups == 0 {
            fs::remove_file(&self.path)?;
        } else {
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.written = 0;
        tracing::debug!("Rotated change log {}", self.path.display());
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Keeps events in memory; clones share the same buffer
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
    milestones: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn milestones(&self) -> Vec<String> {
        self.milestones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChangeSink for MemorySink {
    fn record(&mut self, event: &ChangeEvent) -> io::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn milestone(&mut self, message: &str) -> io::Result<()> {
        self.milestones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
        Ok(())
    }
}

/// Forwards every event to several sinks
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ChangeSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn ChangeSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ChangeSink for FanoutSink {
    fn record(&mut self, event: &ChangeEvent) -> io::Result<()> {
        // Every sink gets the event even if an earlier one failed
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.record(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn milestone(&mut self, message: &str) -> io::Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.milestone(message) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::ChangeReason;
    use crate::core::fingerprint::FileFingerprint;

    fn fp(digest: &str) -> FileFingerprint {
        FileFingerprint {
            path: "etc/hosts".into(),
            digest: digest.into(),
            size: 3,
            mtime: Utc::now(),
            mode: None,
        }
    }

    #[test]
    fn test_event_from_record() {
        let record = ChangeRecord::modified(fp("a"), fp("b"), ChangeReason::Content);
        let event = ChangeEvent::from_record(&record);

        assert_eq!(event.path, "etc/hosts");
        assert_eq!(event.kind, ChangeKind::Modified);
        assert_eq!(event.detail.as_deref(), Some("content (3 -> 3 bytes)"));

        let added = ChangeEvent::from_record(&ChangeRecord::added(fp("a")));
        assert!(added.detail.is_none());
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(&ChangeEvent::new("a".into(), ChangeKind::Added)).unwrap();
        sink.record(&ChangeEvent::new("b".into(), ChangeKind::Removed)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: ChangeEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.path, "b");
        assert_eq!(parsed.kind, ChangeKind::Removed);
        assert!(lines[0].contains("\"kind\":\"added\""));
    }

    #[test]
    fn test_append_to_file_keeps_existing_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/changes.log");

        for name in ["first", "second"] {
            let mut sink = JsonLinesSink::append_to(&path).unwrap();
            sink.record(&ChangeEvent::new(name.into(), ChangeKind::Added)).unwrap();
            sink.flush().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_milestone_lines_are_distinct_from_events() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.milestone("Baseline created at b.json with 3 files").unwrap();
        sink.record(&ChangeEvent::new("a".into(), ChangeKind::Added)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        let milestone: Milestone = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(milestone.message, "Baseline created at b.json with 3 files");
        assert!(serde_json::from_str::<ChangeEvent>(lines[1]).is_ok());
    }

    #[test]
    fn test_log_rotation_keeps_bounded_backups() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("changes.log");

        let mut file = RotatingFile::open(&path, 100, 2).unwrap();
        for i in 0..10 {
            file.write_all(format!("{:0>59}\n", i).as_bytes()).unwrap();
        }
        file.flush().unwrap();

        let backup = |n: usize| dir.path().join(format!("changes.log.{n}"));
        assert!(backup(1).exists());
        assert!(backup(2).exists());
        assert!(!backup(3).exists());
        for p in [path.clone(), backup(1), backup(2)] {
            let content = fs::read_to_string(&p).unwrap();
            assert!(content.len() as u64 <= 100);
            assert!(content.ends_with('\n'));
        }
        assert!(fs::read_to_string(&path).unwrap().ends_with("9\n"));
    }

    #[test]
    fn test_rotation_resumes_from_existing_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("changes.log");
        fs::write(&path, "x".repeat(90)).unwrap();

        let mut file = RotatingFile::open(&path, 100, 1).unwrap();
        file.write_all(&[b'y'; 20]).unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("changes.log.1")).unwrap().len(), 90);
        assert_eq!(fs::read_to_string(&path).unwrap(), "y".repeat(20));
    }

    #[test]
    fn test_fanout_and_memory() {
        let memory = MemorySink::new();
        let mut fanout = FanoutSink::new()
            .with(Box::new(TracingSink))
            .with(Box::new(memory.clone()));

        fanout.record(&ChangeEvent::new("x".into(), ChangeKind::Added)).unwrap();
        fanout.milestone("No changes detected").unwrap();
        assert_eq!(memory.events().len(), 1);
        assert_eq!(memory.milestones(), vec!["No changes detected".to_string()]);
    }
}
