//! Filesystem watches that keep the whitelist live.
//!
//! The [`WatchSupervisor`] owns at most one active watch per [`WatchRole`]:
//!
//! - **Directory**: every eligible directory under the navigated root is
//!   watched non-recursively. New documents join the whitelist and are
//!   announced as `added`; removed or renamed-away documents leave it and are
//!   announced as `removed`.
//! - **File**: the open document. Content writes and atomic rename-saves are
//!   announced as `modified`.
//!
//! # Arming protocol
//!
//! Arming a role retires the previous handle (cancel its token, drop its
//! watcher) and bumps the role generation under the role mutex. The
//! directory enumeration runs without the mutex on a blocking thread; when
//! it finishes the mutex is re-acquired and, if another arm or close moved
//! the generation on meanwhile, the new handle is discarded with
//! [`WatchError::Superseded`]. Only one event loop per role is ever left
//! running.
//!
//! The notify callback only forwards into bounded channels with `try_send`;
//! all whitelist updates and publishing happen in the event loop task or in
//! child tasks it spawns, which stop with the loop's token.
//!
//! A directory watch remembers the real directories it covers. A directory
//! or link that appears later is skipped when it leads back into that set,
//! so a runtime link such as `a/c -> ..` never lists the root a second time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::boundary::BoundaryError;
use crate::broadcast::EventBus;
use crate::ignore::{IgnorePatterns, IGNORE_FILE_NAME};
use crate::session::{SessionCorrelator, DEFAULT_CORRELATION_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::types::ChangeNotification;
use crate::walker::{FileIndexWalker, ScanResult, VisitedDirs};
use crate::whitelist::Whitelist;

/// Depth of the channel between the notify callback and the event loop.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

const ERROR_BUFFER: usize = 16;

/// Errors that can occur while arming a watch.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The platform watcher could not be created or registered.
    #[error("failed to create watcher: {0}")]
    Init(#[from] notify::Error),

    /// The target failed the boundary check.
    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    /// The target is not the kind of entry the role watches.
    #[error("watch target is not usable: {0}")]
    InvalidTarget(PathBuf),

    /// A newer arm or a close replaced this one before it became active.
    #[error("{0} watch was superseded before it became active")]
    Superseded(WatchRole),

    /// The blocking directory enumeration panicked or was aborted.
    #[error("directory scan task failed: {0}")]
    ScanTask(#[from] JoinError),
}

/// Result type for watch operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// The two independent watch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchRole {
    File,
    Directory,
}

impl fmt::Display for WatchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

/// Tuning for the event loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// How long an `added` notification waits for a side-channel record.
    pub correlation_timeout: Duration,
    /// How often the side channel is polled during that wait.
    pub poll_interval: Duration,
    /// Depth of the notify-to-loop channel.
    pub event_buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            correlation_timeout: DEFAULT_CORRELATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

struct Shared {
    walker: FileIndexWalker,
    whitelist: Arc<Whitelist>,
    bus: Arc<EventBus>,
    correlator: Arc<SessionCorrelator>,
    config: WatchConfig,
    running: AtomicUsize,
}

struct ActiveWatch {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    token: CancellationToken,
    target: PathBuf,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    active: Option<ActiveWatch>,
}

impl Slot {
    /// Cancels and drops the active handle, if any.
    fn retire(&mut self, role: WatchRole) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            debug!(%role, target = %active.target.display(), "Retired watch");
        }
    }
}

/// Owns the file and directory watches and their event loops.
pub struct WatchSupervisor {
    shared: Arc<Shared>,
    file: Mutex<Slot>,
    directory: Mutex<Slot>,
}

impl fmt::Debug for WatchSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSupervisor")
            .field("file", &self.target(WatchRole::File))
            .field("directory", &self.target(WatchRole::Directory))
            .field("running_loops", &self.running_loops())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WatchSupervisor {
    #[must_use]
    pub fn new(
        walker: FileIndexWalker,
        whitelist: Arc<Whitelist>,
        bus: Arc<EventBus>,
        correlator: Arc<SessionCorrelator>,
        config: WatchConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                walker,
                whitelist,
                bus,
                correlator,
                config,
                running: AtomicUsize::new(0),
            }),
            file: Mutex::new(Slot::default()),
            directory: Mutex::new(Slot::default()),
        }
    }

    fn slot(&self, role: WatchRole) -> &Mutex<Slot> {
        match role {
            WatchRole::File => &self.file,
            WatchRole::Directory => &self.directory,
        }
    }

    /// Watches every eligible directory under `root`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Boundary`] / [`WatchError::InvalidTarget`] if `root`
    ///   is outside the boundary or not a directory
    /// - [`WatchError::Superseded`] if another arm or close won the race;
    ///   callers treat this as handled
    /// - [`WatchError::Init`] if the platform watcher fails
    pub async fn arm_directory(&self, root: &Path) -> Result<()> {
        let root = self.shared.walker.boundary().validate(root)?;
        if !root.is_dir() {
            return Err(WatchError::InvalidTarget(root));
        }

        // Phase 1: retire the old handle and reserve a generation.
        let (generation, token, watcher, events, errors) = {
            let mut slot = lock(&self.directory);
            slot.generation += 1;
            slot.retire(WatchRole::Directory);
            let (watcher, events, errors) = create_watcher(self.shared.config.event_buffer)?;
            let watcher = Arc::new(Mutex::new(watcher));
            let token = CancellationToken::new();
            slot.active = Some(ActiveWatch {
                watcher: Arc::clone(&watcher),
                token: token.clone(),
                target: root.clone(),
            });
            (slot.generation, token, watcher, events, errors)
        };

        // Phase 2: enumerate without the lock.
        let walker = self.shared.walker.clone();
        let scan_root = root.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            let patterns = walker.ignore_rules().load_patterns(&scan_root);
            let mut visited = VisitedDirs::default();
            let scan = walker.scan_with_visited(&scan_root, &patterns, &mut visited);
            (scan, patterns, visited)
        })
        .await;
        let (scan, patterns, visited) = match scanned {
            Ok(done) => done,
            Err(e) => {
                self.retire_if_current(WatchRole::Directory, generation);
                return Err(e.into());
            }
        };

        // Phase 3: install unless superseded.
        let slot = lock(&self.directory);
        if slot.generation != generation || token.is_cancelled() {
            debug!(root = %root.display(), generation, "Directory watch superseded");
            return Err(WatchError::Superseded(WatchRole::Directory));
        }
        if scan.dirs.is_empty() {
            drop(slot);
            self.retire_if_current(WatchRole::Directory, generation);
            return Err(WatchError::InvalidTarget(root));
        }

        {
            let mut watcher = lock(&watcher);
            for dir in &scan.dirs {
                if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                    warn!(path = %dir.display(), error = %e, "Failed to watch directory");
                }
            }
        }

        let watch = Arc::new(DirectoryWatch {
            shared: Arc::clone(&self.shared),
            token: token.clone(),
            root: root.clone(),
            watcher: Arc::downgrade(&watcher),
            patterns: Mutex::new(patterns),
            visited: Mutex::new(visited),
        });
        let event_loop = DirectoryLoop {
            ctx: LoopContext::new(&self.shared, token, events, errors),
            watch,
        };
        tokio::spawn(event_loop.run());
        drop(slot);

        info!(
            root = %root.display(),
            directories = scan.dirs.len(),
            generation,
            "Directory watch armed"
        );
        Ok(())
    }

    /// Watches a single document for content changes.
    ///
    /// The parent directory is watched non-recursively and events are
    /// filtered to `path`, so saves that replace the file by rename are seen.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is outside the boundary, not a regular
    /// file, or the platform watcher fails.
    pub async fn arm_file(&self, path: &Path) -> Result<()> {
        let target = self.shared.walker.boundary().validate(path)?;
        let parent = match target.parent() {
            Some(parent) if target.is_file() => parent.to_path_buf(),
            _ => return Err(WatchError::InvalidTarget(target)),
        };

        let mut slot = lock(&self.file);
        slot.generation += 1;
        slot.retire(WatchRole::File);

        let (mut watcher, events, errors) = create_watcher(self.shared.config.event_buffer)?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        let token = CancellationToken::new();
        slot.active = Some(ActiveWatch {
            watcher: Arc::new(Mutex::new(watcher)),
            token: token.clone(),
            target: target.clone(),
        });

        let event_loop = FileLoop {
            ctx: LoopContext::new(&self.shared, token, events, errors),
            target: target.clone(),
        };
        tokio::spawn(event_loop.run());
        drop(slot);

        info!(path = %target.display(), "File watch armed");
        Ok(())
    }

    /// Stops the file watch. Idempotent.
    pub fn close_file(&self) {
        self.close_role(WatchRole::File);
    }

    /// Stops the directory watch. Idempotent.
    pub fn close_directory(&self) {
        self.close_role(WatchRole::Directory);
    }

    /// Stops both watches. Idempotent.
    pub fn close(&self) {
        self.close_file();
        self.close_directory();
    }

    /// Retires the role's handle if no arm or close has happened since the
    /// one that reserved `generation`. Returns whether it did.
    fn retire_if_current(&self, role: WatchRole, generation: u64) -> bool {
        let mut slot = lock(self.slot(role));
        if slot.generation != generation {
            return false;
        }
        slot.retire(role);
        true
    }

    fn close_role(&self, role: WatchRole) {
        let mut slot = lock(self.slot(role));
        // Bumping here also supersedes an arm that is still enumerating.
        slot.generation += 1;
        slot.retire(role);
    }

    /// The path the role currently watches, if active.
    #[must_use]
    pub fn target(&self, role: WatchRole) -> Option<PathBuf> {
        lock(self.slot(role))
            .active
            .as_ref()
            .map(|active| active.target.clone())
    }

    #[must_use]
    pub fn is_active(&self, role: WatchRole) -> bool {
        lock(self.slot(role)).active.is_some()
    }

    /// Number of event loops still running, across both roles.
    #[must_use]
    pub fn running_loops(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for WatchSupervisor {
    fn drop(&mut self) {
        self.close();
    }
}

type WatchChannels = (
    RecommendedWatcher,
    mpsc::Receiver<Event>,
    mpsc::Receiver<notify::Error>,
);

/// Creates a platform watcher whose callback only forwards into channels.
fn create_watcher(buffer: usize) -> Result<WatchChannels> {
    let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
    let (error_tx, error_rx) = mpsc::channel(ERROR_BUFFER);

    let watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");
                match event_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Watch event channel full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => {
                        trace!("Watch event loop gone, dropping event");
                    }
                }
            }
            Err(e) => {
                if error_tx.try_send(e).is_err() {
                    trace!("Watch error channel unavailable");
                }
            }
        },
        Config::default(),
    )?;

    Ok((watcher, event_rx, error_rx))
}

// ============================================================================
// Event loops
// ============================================================================

/// Decrements the running-loop count when the loop task ends.
struct RunningGuard(Arc<Shared>);

impl RunningGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.running.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

struct LoopContext {
    shared: Arc<Shared>,
    token: CancellationToken,
    events: mpsc::Receiver<Event>,
    errors: mpsc::Receiver<notify::Error>,
    _running: RunningGuard,
}

impl LoopContext {
    /// Counted as running from construction, so callers see the loop before
    /// the task is first polled.
    fn new(
        shared: &Arc<Shared>,
        token: CancellationToken,
        events: mpsc::Receiver<Event>,
        errors: mpsc::Receiver<notify::Error>,
    ) -> Self {
        Self {
            shared: Arc::clone(shared),
            token,
            events,
            errors,
            _running: RunningGuard::new(shared),
        }
    }

    /// Waits for the next event. `None` on cancellation or channel closure.
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => return None,
                event = self.events.recv() => return event,
                Some(error) = self.errors.recv() => {
                    warn!(error = %error, "File watcher error");
                }
            }
        }
    }

    fn publish(&self, notification: &ChangeNotification) {
        self.shared.bus.publish_notification(notification);
    }
}

struct FileLoop {
    ctx: LoopContext,
    target: PathBuf,
}

impl FileLoop {
    async fn run(mut self) {
        debug!(path = %self.target.display(), "File event loop started");
        while let Some(event) = self.ctx.next_event().await {
            if self.is_content_change(&event) {
                let path = self.ctx.shared.whitelist.display_path(&self.target);
                self.ctx.publish(&ChangeNotification::modified(path));
            }
        }
        debug!(path = %self.target.display(), "File event loop stopped");
    }

    fn is_content_change(&self, event: &Event) -> bool {
        match event.kind {
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) | EventKind::Create(_) => {
                event.paths.iter().any(|p| p == &self.target)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                event.paths.first() == Some(&self.target)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.get(1) == Some(&self.target)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
                event.paths.iter().any(|p| p == &self.target) && self.target.is_file()
            }
            _ => false,
        }
    }
}

struct DirectoryLoop {
    ctx: LoopContext,
    watch: Arc<DirectoryWatch>,
}

impl DirectoryLoop {
    async fn run(mut self) {
        debug!(root = %self.watch.root.display(), "Directory event loop started");
        while let Some(event) = self.ctx.next_event().await {
            self.handle(event);
        }
        debug!(root = %self.watch.root.display(), "Directory event loop stopped");
    }

    /// Applies one event. Never waits: scans and announcements run in child
    /// tasks tied to the loop's token.
    fn handle(&self, event: Event) {
        let watch = &self.watch;
        if event
            .paths
            .iter()
            .any(|p| p.parent() == Some(watch.root.as_path()) && p.ends_with(IGNORE_FILE_NAME))
        {
            watch.reload_patterns();
        }

        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    watch.created(path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    watch.removed(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    for path in &event.paths {
                        watch.removed(path);
                    }
                }
                RenameMode::To => {
                    for path in event.paths {
                        watch.created(path);
                    }
                }
                RenameMode::Both => {
                    let mut paths = event.paths.into_iter();
                    if let Some(from) = paths.next() {
                        watch.removed(&from);
                    }
                    if let Some(to) = paths.next() {
                        watch.created(to);
                    }
                }
                _ => {
                    for path in event.paths {
                        if path.exists() {
                            watch.created(path);
                        } else {
                            watch.removed(&path);
                        }
                    }
                }
            },
            _ => trace!(kind = ?event.kind, "Ignoring event kind"),
        }
    }
}

/// State a directory loop shares with the tasks it spawns.
struct DirectoryWatch {
    shared: Arc<Shared>,
    token: CancellationToken,
    root: PathBuf,
    watcher: Weak<Mutex<RecommendedWatcher>>,
    patterns: Mutex<Arc<IgnorePatterns>>,
    /// Real directories already watched, keyed to the path they are
    /// watched under.
    visited: Mutex<VisitedDirs>,
}

impl DirectoryWatch {
    fn patterns(&self) -> Arc<IgnorePatterns> {
        Arc::clone(&lock(&self.patterns))
    }

    fn reload_patterns(&self) {
        let ignore = self.shared.walker.ignore_rules();
        ignore.invalidate();
        let patterns = ignore.load_patterns(&self.root);
        info!(
            root = %self.root.display(),
            patterns = patterns.patterns().len(),
            "Reloaded ignore patterns"
        );
        *lock(&self.patterns) = patterns;
    }

    fn created(self: &Arc<Self>, path: PathBuf) {
        let Ok(metadata) = std::fs::metadata(&path) else {
            trace!(path = %path.display(), "Created entry vanished before inspection");
            return;
        };

        if metadata.is_dir() {
            self.directory_created(path);
        } else if metadata.is_file() && self.shared.walker.filter().matches(&path) {
            if self.shared.walker.boundary().validate(&path).is_ok() {
                self.document_created(path);
            } else {
                debug!(path = %path.display(), "Ignoring document outside boundary");
            }
        }
    }

    fn directory_created(self: &Arc<Self>, path: PathBuf) {
        let patterns = self.patterns();
        let excluded = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .is_some_and(|name| self.shared.walker.ignore_rules().is_excluded(&name, &patterns));
        if excluded {
            trace!(path = %path.display(), "Ignoring excluded directory");
            return;
        }

        let watch = Arc::clone(self);
        tokio::spawn(async move {
            let token = watch.token.clone();
            tokio::select! {
                () = token.cancelled() => {
                    trace!(path = %path.display(), "Directory scan cancelled");
                }
                () = watch.add_directory(&path, patterns) => {}
            }
        });
    }

    /// Watches and scans a directory that appeared under the root, then
    /// lists its documents.
    async fn add_directory(&self, path: &Path, patterns: Arc<IgnorePatterns>) {
        let real = match self.shared.walker.boundary().validate(path) {
            Ok(real) => real,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring directory outside boundary");
                return;
            }
        };

        let mut visited = {
            let watched = lock(&self.visited);
            if watched.contains(&real) {
                trace!(path = %path.display(), "Directory already watched");
                return;
            }
            if real.as_path() != path && real.starts_with(&self.root) {
                // A link into the root: the watch reaches the target on its own.
                trace!(path = %path.display(), "Symlink target covered by watch");
                return;
            }
            watched.clone()
        };

        // Watch first, then scan: documents written in between are seen by
        // one or the other, and whitelist inserts deduplicate.
        if !self.watch_dirs(std::slice::from_ref(&path.to_path_buf())) {
            return;
        }

        let walker = self.shared.walker.clone();
        let scan_path = path.to_path_buf();
        let scanned = tokio::task::spawn_blocking(move || {
            let scan = walker.scan_with_visited(&scan_path, &patterns, &mut visited);
            (scan, visited)
        })
        .await;
        let (scan, visited): (ScanResult, VisitedDirs) = match scanned {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "Directory scan task failed");
                return;
            }
        };
        lock(&self.visited).absorb_under(visited, path);

        if !self.watch_dirs(scan.dirs.get(1..).unwrap_or_default()) {
            return;
        }
        for file in scan.files {
            self.document_created(file);
        }
    }

    /// Adds watches for newly discovered directories. Returns `false` if
    /// this loop's watcher has already been retired.
    fn watch_dirs(&self, dirs: &[PathBuf]) -> bool {
        let Some(watcher) = self.watcher.upgrade() else {
            return false;
        };
        if self.token.is_cancelled() {
            return false;
        }
        let mut watcher = lock(&watcher);
        for dir in dirs {
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => debug!(path = %dir.display(), "Watching new directory"),
                Err(e) => warn!(path = %dir.display(), error = %e, "Failed to watch directory"),
            }
        }
        true
    }

    /// Lists a new document and announces it once the side channel has had
    /// a chance to report who wrote it.
    fn document_created(&self, path: PathBuf) {
        if !self.shared.whitelist.insert(path.clone()) {
            trace!(path = %path.display(), "Document already listed");
            return;
        }
        debug!(path = %path.display(), "Document added to whitelist");

        let shared = Arc::clone(&self.shared);
        let token = self.token.clone();
        tokio::spawn(async move {
            let actor = tokio::select! {
                () = token.cancelled() => return,
                actor = shared.correlator.await_record(
                    &path,
                    shared.config.correlation_timeout,
                    shared.config.poll_interval,
                ) => actor,
            };
            if !shared.whitelist.contains(&path) {
                trace!(path = %path.display(), "Document removed before announcement");
                return;
            }
            let notification =
                ChangeNotification::added(shared.whitelist.display_path(&path)).with_actor(actor);
            shared.bus.publish_notification(&notification);
        });
    }

    fn removed(&self, path: &Path) {
        let forgotten = lock(&self.visited).forget_under(path);
        if forgotten > 0 {
            debug!(path = %path.display(), directories = forgotten, "Directory left the watch");
        }

        let whitelist = &self.shared.whitelist;
        let removed = if whitelist.remove(path) {
            vec![path.to_path_buf()]
        } else {
            whitelist.remove_under(path)
        };

        for file in removed {
            debug!(path = %file.display(), "Document removed from whitelist");
            self.shared
                .bus
                .publish_notification(&ChangeNotification::removed(whitelist.display_path(&file)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::PathBoundary;
    use crate::ignore::IgnoreRules;
    use crate::walker::DocumentFilter;
    use tempfile::TempDir;

    fn supervisor(home: &Path) -> WatchSupervisor {
        let walker = FileIndexWalker::new(
            Arc::new(PathBoundary::new(home).unwrap()),
            Arc::new(IgnoreRules::new()),
            DocumentFilter::default(),
        );
        WatchSupervisor::new(
            walker,
            Arc::new(Whitelist::new()),
            Arc::new(EventBus::new()),
            Arc::new(SessionCorrelator::new()),
            WatchConfig::default(),
        )
    }

    async fn wait_for_loops(supervisor: &WatchSupervisor, expected: usize) -> bool {
        for _ in 0..50 {
            if supervisor.running_loops() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn role_display() {
        assert_eq!(WatchRole::File.to_string(), "file");
        assert_eq!(
            WatchError::Superseded(WatchRole::Directory).to_string(),
            "directory watch was superseded before it became active"
        );
    }

    #[tokio::test]
    async fn arm_directory_rejects_files_and_escapes() {
        let home = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(home.path().join("a.md"), "x").unwrap();
        let supervisor = supervisor(home.path());

        assert!(matches!(
            supervisor.arm_directory(&home.path().join("a.md")).await,
            Err(WatchError::InvalidTarget(_))
        ));
        assert!(matches!(
            supervisor.arm_directory(outside.path()).await,
            Err(WatchError::Boundary(_))
        ));
        assert_eq!(supervisor.running_loops(), 0);
    }

    #[tokio::test]
    async fn arm_file_rejects_directories() {
        let home = TempDir::new().unwrap();
        let supervisor = supervisor(home.path());
        assert!(matches!(
            supervisor.arm_file(home.path()).await,
            Err(WatchError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn rearming_replaces_the_loop() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir(home.path().join("one")).unwrap();
        std::fs::create_dir(home.path().join("two")).unwrap();
        let supervisor = supervisor(home.path());

        supervisor.arm_directory(&home.path().join("one")).await.unwrap();
        supervisor.arm_directory(&home.path().join("two")).await.unwrap();

        assert!(wait_for_loops(&supervisor, 1).await);
        let target = supervisor.target(WatchRole::Directory).unwrap();
        assert!(target.ends_with("two"));
    }

    #[tokio::test]
    async fn stale_generation_leaves_newer_watch_alone() {
        let home = TempDir::new().unwrap();
        let supervisor = supervisor(home.path());
        supervisor.arm_directory(home.path()).await.unwrap();
        let current = lock(&supervisor.directory).generation;

        assert!(!supervisor.retire_if_current(WatchRole::Directory, current - 1));
        assert!(supervisor.is_active(WatchRole::Directory));

        assert!(supervisor.retire_if_current(WatchRole::Directory, current));
        assert!(!supervisor.is_active(WatchRole::Directory));
        assert!(wait_for_loops(&supervisor, 0).await);
    }

    #[tokio::test]
    async fn close_during_new_directory_scan_stops_everything() {
        let home = TempDir::new().unwrap();
        let supervisor = supervisor(home.path());
        supervisor.arm_directory(home.path()).await.unwrap();

        let fresh = home.path().join("fresh");
        for i in 0..20 {
            let dir = fresh.join(format!("d{i}"));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("doc.md"), "x").unwrap();
        }
        supervisor.close();

        assert!(wait_for_loops(&supervisor, 0).await);
        assert!(!supervisor.is_active(WatchRole::Directory));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_loops() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("a.md"), "x").unwrap();
        let supervisor = supervisor(home.path());

        supervisor.arm_directory(home.path()).await.unwrap();
        supervisor.arm_file(&home.path().join("a.md")).await.unwrap();
        assert_eq!(supervisor.running_loops(), 2);

        supervisor.close();
        supervisor.close();
        supervisor.close_file();
        assert!(!supervisor.is_active(WatchRole::File));
        assert!(!supervisor.is_active(WatchRole::Directory));
        assert!(wait_for_loops(&supervisor, 0).await);
    }
}
