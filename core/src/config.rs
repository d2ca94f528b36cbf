//! Configuration for the LiveMark core, parsed from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LIVEMARK_ROOT` | current directory | Directory indexed at startup |
//! | `LIVEMARK_BOUNDARY_ROOT` | home directory | Containment root for every path |
//! | `LIVEMARK_EXTENSIONS` | `md,markdown` | Comma-separated document extensions |
//! | `LIVEMARK_HISTORY_SIZE` | 50 | Records retained for replay |
//! | `LIVEMARK_SUBSCRIBER_BUFFER` | 32 | Per-subscriber channel depth |
//! | `LIVEMARK_CORRELATION_TIMEOUT_MS` | 5000 | Wait for a side-channel record |
//! | `LIVEMARK_CORRELATION_POLL_MS` | 200 | Poll interval during that wait |
//! | `LIVEMARK_SESSION_LOG` | `~/.livemark/sessions.jsonl` | Session log path, `off` disables |
//! | `LIVEMARK_SESSION_LOG_MAX` | 1000 | Records kept in the session log |
//!
//! # Example
//!
//! ```no_run
//! use livemark_core::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Indexing {}", config.root_dir.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::broadcast::{DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER};
use crate::persistence::DEFAULT_MAX_RECORDS;
use crate::walker::DEFAULT_EXTENSIONS;

/// Default data directory name relative to home.
const DEFAULT_DATA_DIR: &str = ".livemark";

/// Default session log file name inside the data directory.
const DEFAULT_SESSION_LOG: &str = "sessions.jsonl";

const DEFAULT_CORRELATION_TIMEOUT_MS: u64 = 5000;
const DEFAULT_CORRELATION_POLL_MS: u64 = 200;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Core configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory indexed at startup.
    pub root_dir: PathBuf,

    /// Containment root; nothing outside it is ever listed or served.
    pub boundary_root: PathBuf,

    /// Document extensions, without dots.
    pub extensions: Vec<String>,

    /// Records retained by the event bus for replay.
    pub history_size: usize,

    /// Channel depth per subscriber.
    pub subscriber_buffer: usize,

    /// Upper bound on the wait for a side-channel record.
    pub correlation_timeout: Duration,

    /// Poll interval during that wait.
    pub poll_interval: Duration,

    /// Session log path. `None` keeps records in memory only.
    pub session_log: Option<PathBuf>,

    /// Records retained in the session log across restarts.
    pub session_log_max: usize,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - a numeric variable is not a positive integer
    /// - `LIVEMARK_EXTENSIONS` lists no extension
    /// - the home directory cannot be determined and is needed for a default
    /// - the current directory cannot be read and `LIVEMARK_ROOT` is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let home_dir = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());

        let root_dir = match env::var("LIVEMARK_ROOT") {
            Ok(val) => PathBuf::from(val),
            Err(_) => env::current_dir()
                .map_err(|e| ConfigError::invalid("LIVEMARK_ROOT", format!("unset and no current directory: {e}")))?,
        };

        let boundary_root = match env::var("LIVEMARK_BOUNDARY_ROOT") {
            Ok(val) => PathBuf::from(val),
            Err(_) => home_dir.clone().ok_or(ConfigError::NoHomeDirectory)?,
        };

        let extensions = match env::var("LIVEMARK_EXTENSIONS") {
            Ok(val) => {
                let extensions: Vec<String> = val
                    .split(',')
                    .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if extensions.is_empty() {
                    return Err(ConfigError::invalid(
                        "LIVEMARK_EXTENSIONS",
                        "at least one extension is required",
                    ));
                }
                extensions
            }
            Err(_) => DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
        };

        let history_size = positive("LIVEMARK_HISTORY_SIZE", DEFAULT_HISTORY_CAPACITY)?;
        let subscriber_buffer = positive("LIVEMARK_SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER)?;
        let correlation_timeout = Duration::from_millis(positive(
            "LIVEMARK_CORRELATION_TIMEOUT_MS",
            DEFAULT_CORRELATION_TIMEOUT_MS,
        )?);
        let poll_interval = Duration::from_millis(positive(
            "LIVEMARK_CORRELATION_POLL_MS",
            DEFAULT_CORRELATION_POLL_MS,
        )?);

        let session_log = match env::var("LIVEMARK_SESSION_LOG") {
            Ok(val) if val.eq_ignore_ascii_case("off") => None,
            Ok(val) => Some(PathBuf::from(val)),
            Err(_) => Some(
                home_dir
                    .ok_or(ConfigError::NoHomeDirectory)?
                    .join(DEFAULT_DATA_DIR)
                    .join(DEFAULT_SESSION_LOG),
            ),
        };
        let session_log_max = positive("LIVEMARK_SESSION_LOG_MAX", DEFAULT_MAX_RECORDS)?;

        Ok(Self {
            root_dir,
            boundary_root,
            extensions,
            history_size,
            subscriber_buffer,
            correlation_timeout,
            poll_interval,
            session_log,
            session_log_max,
        })
    }
}

/// Reads a positive integer variable, falling back to `default` when unset.
fn positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    match env::var(key) {
        Ok(val) => {
            let parsed = val.trim().parse::<T>().map_err(|_| {
                ConfigError::invalid(key, format!("expected positive integer, got '{val}'"))
            })?;
            if parsed == T::default() {
                return Err(ConfigError::invalid(key, "must be greater than 0"));
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}
