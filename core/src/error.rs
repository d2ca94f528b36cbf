//! Error types for LiveMark core.
//!
//! Each module owns a narrow error enum; [`CoreError`] rolls them up for
//! callers that drive the whole index.

use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

use crate::boundary::BoundaryError;
use crate::config::ConfigError;
use crate::persistence::SessionLogError;
use crate::watcher::WatchError;

/// Errors surfaced by [`LiveIndex`](crate::index::LiveIndex) and startup.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A path failed the containment rule or could not be resolved.
    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    /// A watch could not be armed.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Environment configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The durable session log could not be opened.
    #[error(transparent)]
    SessionLog(#[from] SessionLogError),

    /// A navigation target is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A document is not in the whitelist.
    #[error("document is not in the index: {0}")]
    NotListed(PathBuf),

    /// A blocking index task panicked or was cancelled.
    #[error("index task failed: {0}")]
    Task(#[from] JoinError),
}

impl CoreError {
    /// Returns `true` for rejections caused by the request rather than the
    /// system: boundary violations, wrong entry kinds, unlisted documents.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Boundary(_)
                | Self::NotADirectory(_)
                | Self::NotListed(_)
                | Self::Watch(WatchError::Boundary(_) | WatchError::InvalidTarget(_))
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_classification() {
        let outside = CoreError::Boundary(BoundaryError::OutsideBoundary(PathBuf::from("/etc")));
        assert!(outside.is_rejection());
        assert!(CoreError::NotListed(PathBuf::from("x.md")).is_rejection());

        let config = CoreError::Config(ConfigError::NoHomeDirectory);
        assert!(!config.is_rejection());
        assert_eq!(
            config.to_string(),
            "configuration error: failed to determine home directory"
        );
    }

    #[test]
    fn boundary_message_is_transparent() {
        let err = CoreError::from(BoundaryError::OutsideBoundary(PathBuf::from("/etc/passwd")));
        assert_eq!(
            err.to_string(),
            "path is outside the allowed root: /etc/passwd"
        );
    }
}
