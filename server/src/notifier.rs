//! Hook notifier: forwards tool hook payloads to a running server.
//!
//! External tools invoke `livemark-server notify` with a JSON hook payload
//! on stdin. The payload is turned into a [`SessionRecord`] and posted to
//! `POST /api/sessions`, so the watcher can attribute the file change that
//! follows. The notifier never fails its caller: a missing server, a bad
//! payload or a rejection are logged and reported as an outcome.
//!
//! # Example
//!
//! ```no_run
//! use livemark_server::notifier::{notify, Notifier};
//!
//! # async fn run() -> Result<(), livemark_server::notifier::NotifierError> {
//! let notifier = Notifier::new("http://127.0.0.1:3737")?;
//! let payload = br#"{"session_id":"abc","tool_name":"Write","tool_input":{"file_path":"/home/me/notes.md"}}"#;
//! notify(payload, &notifier).await;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use livemark_core::SessionRecord;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on one delivery, connection included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Actor recorded when the hook payload carries no session id.
const UNKNOWN_ACTOR: &str = "unknown";

/// Errors that can occur while delivering a record.
#[derive(Error, Debug)]
pub enum NotifierError {
    /// The request could not be built, sent or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server rejected record: {status} - {message}")]
    Rejected { status: u16, message: String },
}

/// The subset of a tool hook payload the notifier understands.
#[derive(Debug, Default, Deserialize)]
pub struct HookPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<ToolInput>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl HookPayload {
    /// Builds the side-channel record, or `None` when the tool call names
    /// no file.
    ///
    /// A relative file path is joined to the hook's working directory.
    #[must_use]
    pub fn into_record(self) -> Option<SessionRecord> {
        let Self {
            session_id,
            tool_name,
            tool_input,
            hook_event_name,
            cwd,
        } = self;

        let file_path = tool_input?.file_path?;
        if file_path.as_os_str().is_empty() {
            return None;
        }
        let file_path = match cwd {
            Some(cwd) if file_path.is_relative() => cwd.join(file_path),
            _ => file_path,
        };

        let actor = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ACTOR.to_string());
        let mut record = SessionRecord::new(file_path, actor);
        record.tool_name = tool_name;
        if let Some(event) = hook_event_name {
            record
                .extra_metadata
                .insert("hookEventName".to_string(), Value::String(event));
        }
        Some(record)
    }
}

/// HTTP client for `POST /api/sessions`.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    server_url: String,
}

impl Notifier {
    /// Creates a notifier for the server at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::Http`] if the HTTP client cannot be built.
    pub fn new(server_url: impl Into<String>) -> Result<Self, NotifierError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Posts one record. No retries: the caller is waiting on us.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::Http`] on connection failure or timeout and
    /// [`NotifierError::Rejected`] on a non-2xx answer.
    pub async fn send(&self, record: &SessionRecord) -> Result<(), NotifierError> {
        let url = format!("{}/api/sessions", self.server_url);
        debug!(url = %url, path = %record.file_path.display(), "Sending session record");

        let response = self.client.post(&url).json(record).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(NotifierError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// What became of one hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The server accepted the record.
    Sent,
    /// The payload was unparseable or named no file.
    Ignored,
    /// Delivery failed; details were logged.
    Failed,
}

/// Parses a hook payload and forwards it. Never returns an error.
pub async fn notify(input: &[u8], notifier: &Notifier) -> NotifyOutcome {
    let payload: HookPayload = match serde_json::from_slice(input) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed hook payload");
            return NotifyOutcome::Ignored;
        }
    };

    let Some(record) = payload.into_record() else {
        debug!("Hook payload names no file, nothing to send");
        return NotifyOutcome::Ignored;
    };

    match notifier.send(&record).await {
        Ok(()) => {
            debug!(path = %record.file_path.display(), actor = %record.actor_id, "Session record delivered");
            NotifyOutcome::Sent
        }
        Err(e) => {
            warn!(error = %e, server = %notifier.server_url(), "Failed to deliver session record");
            NotifyOutcome::Failed
        }
    }
}
