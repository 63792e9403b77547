//! Append-only newline-delimited JSON streams.
//!
//! Each [`EventStream`] is bound to one file. Every append opens the file in
//! append mode, writes exactly one line with a single `write_all`, flushes and
//! closes it again, so a call is durable when it returns. Appends from one
//! process are serialized through a mutex; appends from other processes rely
//! on `O_APPEND` whole-line writes and may interleave at line granularity.
//!
//! Reading is lenient: a malformed line is skipped with a warning and never
//! aborts the scan. An I/O error (the path is a directory, a failing disk)
//! ends the scan early with what was read so far.

pub mod record;

pub use record::{payload, EventRecord, EventType};

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("i/o error on stream {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode event record: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// LogPaths
// ---------------------------------------------------------------------------

pub const AUDIT_FILE: &str = "audit.ndjson";
pub const EVENTS_FILE: &str = "events.ndjson";
pub const RESULTS_FILE: &str = "results.ndjson";
pub const PERFORMANCE_FILE: &str = "performance.ndjson";
pub const SELF_REPORT_FILE: &str = "droid_status.ndjson";

/// File locations of every stream inside one logs directory.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogPaths {
    pub audit: PathBuf,
    pub events: PathBuf,
    pub results: PathBuf,
    pub performance: PathBuf,
    pub self_report: PathBuf,
}

impl LogPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            audit: dir.join(AUDIT_FILE),
            events: dir.join(EVENTS_FILE),
            results: dir.join(RESULTS_FILE),
            performance: dir.join(PERFORMANCE_FILE),
            self_report: dir.join(SELF_REPORT_FILE),
        }
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// One append-only channel bound to a file path.
#[derive(Debug)]
pub struct EventStream {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventStream {
    /// Bind a stream to `path`. The file is not touched until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record as a single JSON line.
    pub fn append(&self, record: &EventRecord) -> Result<(), StreamError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| self.io_error(source))?;
        file.flush().map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), event_type = %record.event_type, "event appended");
        Ok(())
    }

    /// Build a freshly timestamped record, append it and hand it back.
    pub fn append_event(
        &self,
        event_type: EventType,
        run_id: &str,
        payload: Map<String, Value>,
    ) -> Result<EventRecord, StreamError> {
        let record = EventRecord::new(event_type, run_id, payload);
        self.append(&record)?;
        Ok(record)
    }

    /// Lazily decode the stream from the start.
    ///
    /// A missing or unreadable file yields an empty sequence. Calling this
    /// again starts a new scan.
    pub fn iter(&self) -> Records {
        let lines = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not open stream for reading");
                None
            }
        };
        Records {
            path: self.path.clone(),
            lines,
            line_no: 0,
            skipped: 0,
        }
    }

    /// Decode every valid record in the stream.
    pub fn load(&self) -> Vec<EventRecord> {
        self.iter().collect()
    }

    fn io_error(&self, source: io::Error) -> StreamError {
        StreamError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Iterator over the decoded lines of a stream.
pub struct Records {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
    skipped: usize,
}

impl Records {
    /// Number of lines skipped so far because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for Records {
    type Item = EventRecord;

    fn next(&mut self) -> Option<EventRecord> {
        loop {
            let line = match self.lines.as_mut()?.next()? {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    // Invalid UTF-8: the bytes are consumed, the next line is readable.
                    self.line_no += 1;
                    self.skipped += 1;
                    warn!(path = %self.path.display(), line = self.line_no, error = %e, "unreadable line skipped");
                    continue;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), line = self.line_no + 1, error = %e, "stream read failed, scan stopped");
                    self.lines = None;
                    return None;
                }
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<EventRecord>(trimmed) {
                Ok(record) => return Some(record),
                Err(e) => {
                    self.skipped += 1;
                    warn!(path = %self.path.display(), line = self.line_no, error = %e, "malformed record skipped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream_in(dir: &tempfile::TempDir, name: &str) -> EventStream {
        EventStream::new(dir.path().join(name))
    }

    #[test]
    fn test_append_writes_one_line_per_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = stream_in(&dir, "events.ndjson");

        for i in 0..3 {
            stream
                .append_event(
                    EventType::TaskScheduled,
                    "r-test",
                    payload(json!({"task_id": format!("T{i}")})),
                )
                .unwrap();
        }

        let content = fs::read_to_string(stream.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));

        let records = stream.load();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].task_id(), Some("T2"));
        assert_eq!(records[0].run_id, "r-test");
    }

    #[test]
    fn test_directory_at_stream_path_loads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("events.ndjson")).unwrap();
        let stream = stream_in(&dir, "events.ndjson");

        let mut records = stream.iter();
        assert!(records.next().is_none());
        assert!(records.next().is_none());
        assert!(stream.load().is_empty());
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = stream_in(&dir, "events.ndjson");
        stream
            .append_event(EventType::GitCommit, "r-test", payload(json!({})))
            .unwrap();
        {
            let mut file = fs::OpenOptions::new().append(true).open(stream.path()).unwrap();
            file.write_all(b"\xff\xfe garbage\n").unwrap();
        }
        stream
            .append_event(EventType::GitCommit, "r-test", payload(json!({})))
            .unwrap();

        let mut records = stream.iter();
        assert_eq!(records.by_ref().count(), 2);
        assert_eq!(records.skipped(), 1);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = stream_in(&dir, "nope.ndjson");
        assert!(stream.load().is_empty());
        assert!(!stream.path().exists());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = stream_in(&dir, "events.ndjson");

        stream
            .append_event(EventType::TaskStarted, "r-test", payload(json!({"task_id": "a"})))
            .unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(stream.path()).unwrap();
            writeln!(file, "{{\"timestamp\": \"not-a-time\", truncated").unwrap();
            writeln!(file).unwrap();
        }
        stream
            .append_event(EventType::TaskCompleted, "r-test", payload(json!({"task_id": "a"})))
            .unwrap();

        let mut iter = stream.iter();
        let records: Vec<_> = iter.by_ref().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(iter.skipped(), 1);
        assert_eq!(records[1].event_type, EventType::TaskCompleted);
    }

    #[test]
    fn test_iter_is_restartable() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = stream_in(&dir, "audit.ndjson");
        stream
            .append_event(EventType::AuditRecorded, "r-test", payload(json!({"action": "x"})))
            .unwrap();

        assert_eq!(stream.iter().count(), 1);
        stream
            .append_event(EventType::AuditRecorded, "r-test", payload(json!({"action": "y"})))
            .unwrap();
        assert_eq!(stream.iter().count(), 2);
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = EventStream::new(dir.path().join("deep/nested/logs/events.ndjson"));
        stream
            .append_event(EventType::GitCommit, "r-test", Map::new())
            .unwrap();
        assert!(stream.path().exists());
    }

    #[test]
    fn test_concurrent_appends_never_split_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = std::sync::Arc::new(stream_in(&dir, "events.ndjson"));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let stream = stream.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        stream
                            .append_event(
                                EventType::DroidSelfReport,
                                "r-test",
                                payload(json!({"agent_id": format!("a{t}"), "seq": i, "pad": "x".repeat(512)})),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut iter = stream.iter();
        assert_eq!(iter.by_ref().count(), 200);
        assert_eq!(iter.skipped(), 0);
    }
}
