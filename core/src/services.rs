//! Wiring of the core services from a [`Config`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::boundary::PathBoundary;
use crate::broadcast::EventBus;
use crate::config::Config;
use crate::error::Result;
use crate::ignore::IgnoreRules;
use crate::index::LiveIndex;
use crate::session::SessionCorrelator;
use crate::walker::{DocumentFilter, FileIndexWalker};
use crate::watcher::{WatchConfig, WatchSupervisor, DEFAULT_EVENT_BUFFER};
use crate::whitelist::Whitelist;

/// Every long-lived core service, shared by reference count.
#[derive(Debug, Clone)]
pub struct LiveMark {
    pub boundary: Arc<PathBoundary>,
    pub bus: Arc<EventBus>,
    pub correlator: Arc<SessionCorrelator>,
    pub index: Arc<LiveIndex>,
    root_dir: PathBuf,
}

impl LiveMark {
    /// Builds the services. Nothing is scanned or watched until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if the boundary root is unusable. A session log that
    /// cannot be opened is logged and replaced by an in-memory store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let boundary = Arc::new(PathBoundary::new(&config.boundary_root)?);
        let walker = FileIndexWalker::new(
            Arc::clone(&boundary),
            Arc::new(IgnoreRules::new()),
            DocumentFilter::new(config.extensions.iter().map(String::as_str)),
        );

        let bus = Arc::new(EventBus::with_capacity(
            config.history_size,
            config.subscriber_buffer,
        ));

        let correlator = match &config.session_log {
            Some(path) => match SessionCorrelator::with_log(path, config.session_log_max) {
                Ok(correlator) => correlator,
                Err(e) => {
                    warn!(error = %e, "Session log unavailable, keeping records in memory");
                    SessionCorrelator::new()
                }
            },
            None => SessionCorrelator::new(),
        };
        let correlator = Arc::new(correlator);

        let whitelist = Arc::new(Whitelist::new());
        let supervisor = WatchSupervisor::new(
            walker.clone(),
            Arc::clone(&whitelist),
            Arc::clone(&bus),
            Arc::clone(&correlator),
            WatchConfig {
                correlation_timeout: config.correlation_timeout,
                poll_interval: config.poll_interval,
                event_buffer: DEFAULT_EVENT_BUFFER,
            },
        );
        let index = Arc::new(LiveIndex::new(walker, whitelist, supervisor));

        info!(
            boundary = %boundary.root().display(),
            extensions = ?config.extensions,
            "Core services initialized"
        );

        Ok(Self {
            boundary,
            bus,
            correlator,
            index,
            root_dir: config.root_dir.clone(),
        })
    }

    /// Indexes the configured root and arms its directory watch.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is outside the boundary, not a
    /// directory, or cannot be watched.
    pub async fn start(&self) -> Result<PathBuf> {
        self.index.navigate(&self.root_dir).await
    }

    /// Stops all watches.
    pub fn shutdown(&self) {
        self.index.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config_for(home: &TempDir) -> Config {
        Config {
            root_dir: home.path().join("docs"),
            boundary_root: home.path().to_path_buf(),
            extensions: vec!["md".to_string()],
            history_size: 8,
            subscriber_buffer: 4,
            correlation_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(20),
            session_log: Some(home.path().join(".livemark/sessions.jsonl")),
            session_log_max: 10,
        }
    }

    #[tokio::test]
    async fn start_indexes_configured_root() {
        let home = TempDir::new().unwrap();
        fs::create_dir(home.path().join("docs")).unwrap();
        fs::write(home.path().join("docs/a.md"), "a").unwrap();
        fs::write(home.path().join("docs/b.markdown"), "b").unwrap();

        let livemark = LiveMark::from_config(&config_for(&home)).unwrap();
        livemark.start().await.unwrap();

        assert_eq!(livemark.index.whitelist().len(), 1);
        assert_eq!(livemark.bus.capacity(), 8);
        assert!(home.path().join(".livemark/sessions.jsonl").exists());
        livemark.shutdown();
    }

    #[test]
    fn missing_boundary_root_fails() {
        let home = TempDir::new().unwrap();
        let mut config = config_for(&home);
        config.boundary_root = home.path().join("missing");
        assert!(LiveMark::from_config(&config).is_err());
    }
}
