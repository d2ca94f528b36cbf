//! Server configuration, layered over the core configuration.
//!
//! # Environment Variables
//!
//! Everything read by [`livemark_core::Config`], plus:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LIVEMARK_PORT` | 3737 | Port bound on `127.0.0.1` |
//! | `LIVEMARK_KEEPALIVE_SECS` | 15 | Interval between SSE keep-alive comments |
//! | `LIVEMARK_LOG_JSON` | `false` | Emit JSON log lines instead of text |
//! | `LIVEMARK_SERVER_URL` | `http://127.0.0.1:3737` | Where `notify` posts records |

use std::env;
use std::time::Duration;

use livemark_core::config::{Config as CoreConfig, ConfigError};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3737;

/// Default server URL used by the notifier.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3737";

const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Indexing, watching and correlation settings.
    pub core: CoreConfig,

    /// HTTP port.
    pub port: u16,

    /// Interval between SSE keep-alive comments.
    pub keepalive: Duration,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any core variable is invalid, if
    /// `LIVEMARK_PORT` is not a port number in 1-65535, or if
    /// `LIVEMARK_KEEPALIVE_SECS` is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let core = CoreConfig::from_env()?;

        let port = match env::var("LIVEMARK_PORT") {
            Ok(val) => match val.trim().parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LIVEMARK_PORT".to_string(),
                        message: format!("expected port number 1-65535, got '{val}'"),
                    })
                }
            },
            Err(_) => DEFAULT_PORT,
        };

        let keepalive_secs = match env::var("LIVEMARK_KEEPALIVE_SECS") {
            Ok(val) => match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LIVEMARK_KEEPALIVE_SECS".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })
                }
            },
            Err(_) => DEFAULT_KEEPALIVE_SECS,
        };

        Ok(Self {
            core,
            port,
            keepalive: Duration::from_secs(keepalive_secs),
        })
    }
}

/// Whether `LIVEMARK_LOG_JSON` asks for JSON log output.
///
/// Read separately from [`Config`] because logging is set up before the
/// configuration is parsed, so configuration errors are logged too.
#[must_use]
pub fn json_logging_requested() -> bool {
    env::var("LIVEMARK_LOG_JSON")
        .map(|val| matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// The server URL the notifier posts to.
#[must_use]
pub fn server_url_from_env() -> String {
    env::var("LIVEMARK_SERVER_URL")
        .ok()
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}
