//! Correlation of external tool activity with filesystem events.
//!
//! External tools report "actor X touched file Y" through a side channel.
//! The watch loop asks the [`SessionCorrelator`] who touched a newly created
//! file, waiting a bounded time because the report and the filesystem event
//! race each other.
//!
//! Records never expire; a newer record for the same path replaces the old
//! one. When a [`SessionLog`] is attached, records survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use crate::persistence::{SessionLog, SessionLogError};

/// Default upper bound for [`SessionCorrelator::await_record`].
pub const DEFAULT_CORRELATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default poll interval for [`SessionCorrelator::await_record`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Who last touched a file, as reported by an external tool.
///
/// Fields other than the known ones are kept in `extra_metadata`, so the
/// side channel can carry arbitrary context through to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub file_path: PathBuf,
    pub actor_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub extra_metadata: Map<String, Value>,
}

impl SessionRecord {
    pub fn new(file_path: PathBuf, actor_id: impl Into<String>) -> Self {
        Self {
            file_path,
            actor_id: actor_id.into(),
            tool_name: None,
            timestamp: Utc::now(),
            extra_metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// Path-keyed store of the latest [`SessionRecord`] per file.
#[derive(Debug, Default)]
pub struct SessionCorrelator {
    records: RwLock<HashMap<PathBuf, SessionRecord>>,
    log: Option<Mutex<SessionLog>>,
}

impl SessionCorrelator {
    /// Creates an in-memory correlator with no durable log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a correlator backed by the log at `path`, preloaded with the
    /// records it retains.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or compacted.
    pub fn with_log(path: impl Into<PathBuf>, max_records: usize) -> Result<Self, SessionLogError> {
        let (log, history) = SessionLog::open(path, max_records)?;
        let mut records = HashMap::with_capacity(history.len());
        for record in history {
            records.insert(record.file_path.clone(), record);
        }
        debug!(
            path = %log.path().display(),
            records = records.len(),
            "Restored session records"
        );
        Ok(Self {
            records: RwLock::new(records),
            log: Some(Mutex::new(log)),
        })
    }

    /// Stores `record` as the latest for its path and appends it to the log.
    ///
    /// A failing append is logged; the in-memory record is kept regardless.
    pub fn register(&self, record: SessionRecord) {
        if let Some(log) = &self.log {
            let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = log.append(&record) {
                warn!(error = %e, "Failed to persist session record");
            }
        }

        trace!(
            path = %record.file_path.display(),
            actor = %record.actor_id,
            "Registered session record"
        );
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.file_path.clone(), record);
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<SessionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `timeout` for a record for `path`, checking immediately
    /// and then every `poll_interval`. Returns the actor ID, or `None` on
    /// timeout.
    pub async fn await_record(
        &self,
        path: &Path,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let poll_interval = poll_interval.max(Duration::from_millis(1));

        loop {
            if let Some(record) = self.get(path) {
                return Some(record.actor_id);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(path = %path.display(), "No session record before timeout");
                return None;
            }
            time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}
