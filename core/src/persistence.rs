//! Durable JSON-lines log backing the session correlator.
//!
//! Each line is one [`SessionRecord`]. On open the log is replayed, keeping
//! only the newest `max_records`; if it held more, it is rewritten compacted
//! through a temporary file and an atomic rename. Appends are synchronous
//! and flushed per record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::SessionRecord;

/// Default cap on records kept across restarts.
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// Malformed-line warnings emitted per load before the rest are suppressed.
const MAX_PARSE_WARNINGS: usize = 5;

/// Errors from reading or writing the session log.
#[derive(Error, Debug)]
pub enum SessionLogError {
    #[error("session log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize session record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionLogError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Append handle on an open session log.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    file: File,
    max_records: usize,
}

impl SessionLog {
    /// Opens (creating if needed) the log at `path` and returns the retained
    /// records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionLogError::Io`] if the directory cannot be created,
    /// the file cannot be read, or compaction fails. Individual malformed
    /// lines are skipped, never reported as errors.
    pub fn open(
        path: impl Into<PathBuf>,
        max_records: usize,
    ) -> Result<(Self, Vec<SessionRecord>), SessionLogError> {
        let path = path.into();
        let max_records = max_records.max(1);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SessionLogError::io(parent, e))?;
        }

        let (mut records, total) = read_records(&path)?;
        if records.len() > max_records {
            let dropped = records.len() - max_records;
            records.drain(..dropped);
            info!(
                path = %path.display(),
                dropped,
                kept = records.len(),
                "Compacting session log"
            );
            rewrite(&path, &records)?;
        } else if total > records.len() {
            // Malformed lines only: rewrite so they are not re-parsed forever.
            rewrite(&path, &records)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SessionLogError::io(&path, e))?;

        debug!(path = %path.display(), records = records.len(), "Opened session log");
        Ok((
            Self {
                path,
                file,
                max_records,
            },
            records,
        ))
    }

    /// Appends one record as a single line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append(&mut self, record: &SessionRecord) -> Result<(), SessionLogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| SessionLogError::io(&self.path, e))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn max_records(&self) -> usize {
        self.max_records
    }
}

/// Reads every parseable record. Also returns the count of non-blank lines.
fn read_records(path: &Path) -> Result<(Vec<SessionRecord>, usize), SessionLogError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(SessionLogError::io(path, e)),
    };

    let mut records = Vec::new();
    let mut total = 0usize;
    let mut warnings = 0usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SessionLogError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        match serde_json::from_str::<SessionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warnings += 1;
                if warnings <= MAX_PARSE_WARNINGS {
                    warn!(line = index + 1, error = %e, "Skipping malformed session log line");
                } else if warnings == MAX_PARSE_WARNINGS + 1 {
                    warn!("Too many malformed session log lines, suppressing further warnings");
                }
            }
        }
    }

    Ok((records, total))
}

fn rewrite(path: &Path, records: &[SessionRecord]) -> Result<(), SessionLogError> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let file = File::create(&tmp_path).map_err(|e| SessionLogError::io(&tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer
            .write_all(b"\n")
            .map_err(|e| SessionLogError::io(&tmp_path, e))?;
    }
    writer
        .into_inner()
        .map_err(|e| SessionLogError::io(&tmp_path, e.into_error()))?
        .sync_all()
        .map_err(|e| SessionLogError::io(&tmp_path, e))?;

    fs::rename(&tmp_path, path).map_err(|e| SessionLogError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, actor: &str) -> SessionRecord {
        SessionRecord::new(PathBuf::from(path), actor)
    }

    #[test]
    fn open_creates_missing_log_and_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sessions.jsonl");

        let (_log, records) = SessionLog::open(&path, 10).unwrap();
        assert!(records.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn appended_records_are_replayed_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.jsonl");
        {
            let (mut log, _) = SessionLog::open(&path, 10).unwrap();
            log.append(&record("/h/a.md", "s1")).unwrap();
            log.append(&record("/h/b.md", "s2")).unwrap();
        }

        let (_log, records) = SessionLog::open(&path, 10).unwrap();
        let actors: Vec<&str> = records.iter().map(|r| r.actor_id.as_str()).collect();
        assert_eq!(actors, vec!["s1", "s2"]);
    }

    #[test]
    fn oversized_log_is_truncated_and_compacted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.jsonl");
        {
            let (mut log, _) = SessionLog::open(&path, 100).unwrap();
            for i in 0..6 {
                log.append(&record(&format!("/h/{i}.md"), &format!("s{i}")))
                    .unwrap();
            }
        }

        let (_log, records) = SessionLog::open(&path, 3).unwrap();
        let actors: Vec<&str> = records.iter().map(|r| r.actor_id.as_str()).collect();
        assert_eq!(actors, vec!["s3", "s4", "s5"]);

        let on_disk = fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.lines().count(), 3);
        assert!(!dir.path().join("sessions.jsonl.tmp").exists());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.jsonl");
        let good = serde_json::to_string(&record("/h/a.md", "s1")).unwrap();
        fs::write(&path, format!("not json\n{good}\n{{\"half\":\n\n")).unwrap();

        let (_log, records) = SessionLog::open(&path, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor_id, "s1");
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn io_error_display_names_the_path() {
        let err = SessionLogError::io(
            Path::new("/x/sessions.jsonl"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/x/sessions.jsonl"));
    }
}
