//! The live document index: whitelist, walker and watches kept in step.
//!
//! [`LiveIndex::navigate`] re-indexes a root and re-arms the directory
//! watch; [`LiveIndex::open_file`] marks a listed document as current and
//! arms the file watch. Navigations are serialized, so the whitelist root
//! and the directory watch always agree once a call returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::walker::FileIndexWalker;
use crate::watcher::{WatchError, WatchRole, WatchSupervisor};
use crate::whitelist::Whitelist;

/// Whitelist plus the machinery that keeps it current.
#[derive(Debug)]
pub struct LiveIndex {
    walker: FileIndexWalker,
    whitelist: Arc<Whitelist>,
    supervisor: WatchSupervisor,
    navigation: Mutex<u64>,
}

impl LiveIndex {
    /// `supervisor` must have been built over the same walker and whitelist.
    #[must_use]
    pub fn new(walker: FileIndexWalker, whitelist: Arc<Whitelist>, supervisor: WatchSupervisor) -> Self {
        Self {
            walker,
            whitelist,
            supervisor,
            navigation: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn whitelist(&self) -> &Arc<Whitelist> {
        &self.whitelist
    }

    #[must_use]
    pub fn supervisor(&self) -> &WatchSupervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn walker(&self) -> &FileIndexWalker {
        &self.walker
    }

    /// Base for relative paths: the current root, else the boundary root.
    fn base_dir(&self) -> PathBuf {
        self.whitelist
            .root_dir()
            .unwrap_or_else(|| self.walker.boundary().root().to_path_buf())
    }

    /// Makes `dir` the indexed root.
    ///
    /// Validates the target, rebuilds the whitelist from a fresh scan and
    /// re-arms the directory watch. Returns the resolved root.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Boundary`] if `dir` escapes the boundary or does not exist
    /// - [`CoreError::NotADirectory`] if it is not a directory
    /// - [`CoreError::Watch`] if the watch cannot be created
    pub async fn navigate(&self, dir: &Path) -> Result<PathBuf> {
        let root = self.walker.boundary().validate_from(dir, &self.base_dir())?;
        if !root.is_dir() {
            return Err(CoreError::NotADirectory(root));
        }

        let mut navigation = self.navigation.lock().await;
        *navigation += 1;
        let generation = *navigation;

        // Navigation is an explicit request for fresh rules.
        self.walker.ignore_rules().invalidate();
        let walker = self.walker.clone();
        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || walker.collect(&scan_root)).await?;
        let count = files.len();

        self.whitelist.replace(root.clone(), files, generation);
        if self
            .supervisor
            .target(WatchRole::File)
            .is_some_and(|target| !target.starts_with(&root))
        {
            self.supervisor.close_file();
        }

        match self.supervisor.arm_directory(&root).await {
            Ok(()) => {}
            Err(WatchError::Superseded(role)) => {
                debug!(%role, root = %root.display(), "Navigation watch superseded");
            }
            Err(e) => return Err(e.into()),
        }

        info!(root = %root.display(), files = count, generation, "Navigated");
        Ok(root)
    }

    /// Resolves `path` to its whitelisted form.
    ///
    /// Relative paths are taken from the current root. A path reached
    /// through a symlink is accepted under the name the scan listed it as.
    ///
    /// # Errors
    ///
    /// [`CoreError::Boundary`] on escape, [`CoreError::NotListed`] if the
    /// document is not in the whitelist.
    pub fn resolve_document(&self, path: &Path) -> Result<PathBuf> {
        let base = self.base_dir();
        let real = self.walker.boundary().validate_from(path, &base)?;

        let listed = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        if self.whitelist.contains(&listed) {
            return Ok(listed);
        }
        if self.whitelist.contains(&real) {
            return Ok(real);
        }
        Err(CoreError::NotListed(real))
    }

    /// Marks a listed document as current and watches it for changes.
    ///
    /// # Errors
    ///
    /// See [`resolve_document`](Self::resolve_document); also
    /// [`CoreError::Watch`] if the file watch cannot be armed.
    pub async fn open_file(&self, path: &Path) -> Result<PathBuf> {
        let document = self.resolve_document(path)?;
        if !self.whitelist.set_current_file(&document) {
            return Err(CoreError::NotListed(document));
        }
        self.supervisor.arm_file(&document).await?;
        debug!(path = %document.display(), "Opened document");
        Ok(document)
    }

    /// Clears the current document and stops its watch.
    pub fn close_file(&self) {
        self.whitelist.clear_current_file();
        self.supervisor.close_file();
    }

    /// Stops all watches.
    pub fn shutdown(&self) {
        self.supervisor.close();
    }
}
