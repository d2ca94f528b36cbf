//! Recursive, symlink-aware document discovery.
//!
//! [`FileIndexWalker`] walks a root depth-first and produces the sorted list
//! of documents eligible for the whitelist, plus the directories a watch
//! must cover. `walkdir` never descends into symlinked directories, so a
//! link whose target lies outside the current walk is followed through a
//! separate walk keyed by the target's real path, and the results are mapped
//! back under the link's own path. A shared set of visited real directories
//! guarantees termination when links form cycles, and means a directory
//! reachable through two links is listed only once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::boundary::PathBoundary;
use crate::ignore::{IgnorePatterns, IgnoreRules};

/// Document extensions tracked when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Matches document files by extension, ignoring ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilter {
    extensions: Vec<String>,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().copied())
    }
}

impl DocumentFilter {
    /// Creates a filter from extensions given with or without a leading dot.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Returns `true` if the path's extension is a tracked document extension.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// Output of a scan: eligible documents and the directories containing them.
///
/// Both lists are sorted and free of duplicates. Paths use the caller's
/// prefix, not the symlink-resolved one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

/// Real directories a walk has listed, each with the path it was listed
/// under.
///
/// A live watch keeps one of these across scans so a directory that appears
/// later, or a link created later, never lists a tree a second time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedDirs {
    dirs: HashMap<PathBuf, PathBuf>,
}

impl VisitedDirs {
    #[must_use]
    pub fn contains(&self, real: &Path) -> bool {
        self.dirs.contains_key(real)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Records `real` as listed under `shown`. Returns `false` if it was
    /// already listed.
    fn insert(&mut self, real: &Path, shown: &Path) -> bool {
        if self.dirs.contains_key(real) {
            return false;
        }
        self.dirs.insert(real.to_path_buf(), shown.to_path_buf());
        true
    }

    /// Adds the directories from `other` listed at or below `shown` and not
    /// already listed here.
    pub fn absorb_under(&mut self, other: VisitedDirs, shown: &Path) {
        for (real, listed) in other.dirs {
            if listed.starts_with(shown) {
                self.dirs.entry(real).or_insert(listed);
            }
        }
    }

    /// Forgets directories listed at or below `shown`, returning how many.
    pub fn forget_under(&mut self, shown: &Path) -> usize {
        let before = self.dirs.len();
        self.dirs.retain(|_, listed| !listed.starts_with(shown));
        before - self.dirs.len()
    }
}

struct WalkState<'a> {
    visited: &'a mut VisitedDirs,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Builds the document whitelist for a root directory.
#[derive(Debug, Clone)]
pub struct FileIndexWalker {
    boundary: Arc<PathBoundary>,
    ignore: Arc<IgnoreRules>,
    filter: DocumentFilter,
}

impl FileIndexWalker {
    #[must_use]
    pub fn new(boundary: Arc<PathBoundary>, ignore: Arc<IgnoreRules>, filter: DocumentFilter) -> Self {
        Self {
            boundary,
            ignore,
            filter,
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &Arc<PathBoundary> {
        &self.boundary
    }

    #[must_use]
    pub fn ignore_rules(&self) -> &Arc<IgnoreRules> {
        &self.ignore
    }

    #[must_use]
    pub fn filter(&self) -> &DocumentFilter {
        &self.filter
    }

    /// Returns every eligible document under `root_dir`, sorted.
    #[must_use]
    pub fn collect(&self, root_dir: &Path) -> Vec<PathBuf> {
        self.scan(root_dir).files
    }

    /// Scans `root_dir` using the custom patterns stored in that root.
    #[must_use]
    pub fn scan(&self, root_dir: &Path) -> ScanResult {
        let patterns = self.ignore.load_patterns(root_dir);
        self.scan_with(root_dir, &patterns)
    }

    /// Scans `dir` with an explicit pattern set.
    #[must_use]
    pub fn scan_with(&self, dir: &Path, patterns: &IgnorePatterns) -> ScanResult {
        self.scan_with_visited(dir, patterns, &mut VisitedDirs::default())
    }

    /// Scans `dir`, skipping real directories already in `visited` and
    /// recording the ones this scan lists.
    ///
    /// Used for sub-directories that appear while a root is being watched,
    /// where the root's patterns (not the sub-directory's) apply and the
    /// directories the watch already covers must not be listed again.
    #[must_use]
    pub fn scan_with_visited(
        &self,
        dir: &Path,
        patterns: &IgnorePatterns,
        visited: &mut VisitedDirs,
    ) -> ScanResult {
        let real_root = match self.boundary.validate(dir) {
            Ok(real) if real.is_dir() => real,
            Ok(real) => {
                warn!(path = %real.display(), "Scan root is not a directory");
                return ScanResult::default();
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Refusing to scan directory");
                return ScanResult::default();
            }
        };
        let display_root = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            real_root.clone()
        };

        let mut state = WalkState {
            visited,
            files: Vec::new(),
            dirs: Vec::new(),
        };
        self.walk(&real_root, &display_root, patterns, &mut state);

        let WalkState {
            mut files,
            mut dirs,
            ..
        } = state;
        files.sort();
        files.dedup();
        dirs.sort();
        dirs.dedup();

        debug!(
            root = %display_root.display(),
            files = files.len(),
            dirs = dirs.len(),
            "Scan complete"
        );

        ScanResult { files, dirs }
    }

    /// Walks one real directory tree, reporting paths under `display_start`.
    fn walk(
        &self,
        real_start: &Path,
        display_start: &Path,
        patterns: &IgnorePatterns,
        state: &mut WalkState<'_>,
    ) {
        if !state.visited.insert(real_start, display_start) {
            trace!(path = %real_start.display(), "Directory already visited");
            return;
        }
        state.dirs.push(display_start.to_path_buf());

        let mut entries = WalkDir::new(real_start)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            let shown = remap(path, real_start, display_start);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let name = entry.file_name().to_string_lossy();
                if self.ignore.is_excluded(&name, patterns) {
                    trace!(path = %shown.display(), "Skipping excluded directory");
                    entries.skip_current_dir();
                    continue;
                }
                // Links are never followed here, so the entry path is real.
                if !state.visited.insert(path, &shown) {
                    entries.skip_current_dir();
                    continue;
                }
                state.dirs.push(shown);
            } else if file_type.is_symlink() {
                self.follow_symlink(path, shown, real_start, patterns, state);
            } else if file_type.is_file() && self.filter.matches(path) {
                state.files.push(shown);
            }
        }
    }

    fn follow_symlink(
        &self,
        link: &Path,
        shown: PathBuf,
        real_start: &Path,
        patterns: &IgnorePatterns,
        state: &mut WalkState<'_>,
    ) {
        let Some(resolved) = self.boundary.validate_symlink_node(link) else {
            return;
        };

        if resolved.metadata.is_dir() {
            let name = shown
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.ignore.is_excluded(&name, patterns) {
                return;
            }
            if resolved.target.starts_with(real_start) {
                // The surrounding walk reaches the target on its own.
                trace!(link = %link.display(), "Symlink target covered by current walk");
                return;
            }
            debug!(
                link = %link.display(),
                target = %resolved.target.display(),
                "Following symlinked directory"
            );
            self.walk(&resolved.target, &shown, patterns, state);
        } else if resolved.metadata.is_file() && self.filter.matches(&shown) {
            state.files.push(shown);
        }
    }
}

fn remap(path: &Path, real_start: &Path, display_start: &Path) -> PathBuf {
    match path.strip_prefix(real_start) {
        Ok(relative) => display_start.join(relative),
        Err(_) => path.to_path_buf(),
    }
}
