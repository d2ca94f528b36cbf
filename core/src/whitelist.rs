//! The authoritative set of documents that may be listed and served.
//!
//! All state lives behind one `RwLock`: the serving layer reads on every
//! request, while writes are rare (full replace on navigation, single-path
//! updates from the directory watch).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, trace};

/// A consistent copy of the whitelist at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistSnapshot {
    pub root_dir: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub current_file: Option<PathBuf>,
}

impl WhitelistSnapshot {
    /// Formats `path` relative to this snapshot's root.
    #[must_use]
    pub fn display_path(&self, path: &Path) -> String {
        display_relative(self.root_dir.as_deref(), path)
    }
}

#[derive(Debug, Default)]
struct WhitelistState {
    root_dir: Option<PathBuf>,
    files: BTreeSet<PathBuf>,
    current_file: Option<PathBuf>,
    generation: u64,
}

/// Shared, lock-guarded whitelist of eligible document paths.
#[derive(Debug, Default)]
pub struct Whitelist {
    state: RwLock<WhitelistState>,
}

impl Whitelist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, WhitelistState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WhitelistState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces root and contents wholesale.
    ///
    /// `generation` orders concurrent navigations: a replacement older than
    /// the one already applied is ignored and `false` is returned. The
    /// current file is kept only if it is still listed.
    pub fn replace(&self, root_dir: PathBuf, files: Vec<PathBuf>, generation: u64) -> bool {
        let mut state = self.write();
        if generation < state.generation {
            debug!(
                generation,
                current = state.generation,
                "Ignoring stale whitelist replacement"
            );
            return false;
        }

        state.files = files.into_iter().collect();
        if state
            .current_file
            .as_ref()
            .is_some_and(|current| !state.files.contains(current))
        {
            state.current_file = None;
        }
        debug!(
            root = %root_dir.display(),
            files = state.files.len(),
            generation,
            "Whitelist replaced"
        );
        state.root_dir = Some(root_dir);
        state.generation = generation;
        true
    }

    /// Adds one document. Returns `true` only if it was newly added.
    ///
    /// Paths outside the current root are refused, so late events from a
    /// retired watch cannot leak into a freshly navigated root.
    pub fn insert(&self, path: PathBuf) -> bool {
        let mut state = self.write();
        let under_root = state
            .root_dir
            .as_ref()
            .is_some_and(|root| path.starts_with(root));
        if !under_root {
            trace!(path = %path.display(), "Refusing whitelist insert outside root");
            return false;
        }
        state.files.insert(path)
    }

    /// Removes one document. Returns `true` if it was listed.
    pub fn remove(&self, path: &Path) -> bool {
        let mut state = self.write();
        if state.current_file.as_deref() == Some(path) {
            state.current_file = None;
        }
        state.files.remove(path)
    }

    /// Removes every document at or below `dir`, returning them sorted.
    pub fn remove_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut state = self.write();
        let removed: Vec<PathBuf> = state
            .files
            .iter()
            .filter(|file| file.starts_with(dir))
            .cloned()
            .collect();
        for file in &removed {
            state.files.remove(file);
        }
        if state
            .current_file
            .as_ref()
            .is_some_and(|current| current.starts_with(dir))
        {
            state.current_file = None;
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.read().files.contains(path)
    }

    #[must_use]
    pub fn root_dir(&self) -> Option<PathBuf> {
        self.read().root_dir.clone()
    }

    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.read().files.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().files.is_empty()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Marks `path` as the open document. Returns `false` if it is not listed.
    pub fn set_current_file(&self, path: &Path) -> bool {
        let mut state = self.write();
        if !state.files.contains(path) {
            return false;
        }
        state.current_file = Some(path.to_path_buf());
        true
    }

    pub fn clear_current_file(&self) {
        self.write().current_file = None;
    }

    #[must_use]
    pub fn current_file(&self) -> Option<PathBuf> {
        self.read().current_file.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> WhitelistSnapshot {
        let state = self.read();
        WhitelistSnapshot {
            root_dir: state.root_dir.clone(),
            files: state.files.iter().cloned().collect(),
            current_file: state.current_file.clone(),
        }
    }

    /// Formats `path` for clients: relative to the root with `/` separators
    /// when under it, absolute otherwise.
    #[must_use]
    pub fn display_path(&self, path: &Path) -> String {
        let root = self.root_dir();
        display_relative(root.as_deref(), path)
    }
}

fn display_relative(root: Option<&Path>, path: &Path) -> String {
    match root.and_then(|root| path.strip_prefix(root).ok()) {
        Some(relative) if !relative.as_os_str().is_empty() => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> Whitelist {
        let whitelist = Whitelist::new();
        whitelist.replace(
            PathBuf::from("/home/u/notes"),
            vec![
                PathBuf::from("/home/u/notes/b.md"),
                PathBuf::from("/home/u/notes/a.md"),
                PathBuf::from("/home/u/notes/sub/c.md"),
            ],
            1,
        );
        whitelist
    }

    #[test]
    fn replace_sorts_and_sets_root() {
        let whitelist = populated();
        assert_eq!(whitelist.root_dir(), Some(PathBuf::from("/home/u/notes")));
        assert_eq!(
            whitelist.files(),
            vec![
                PathBuf::from("/home/u/notes/a.md"),
                PathBuf::from("/home/u/notes/b.md"),
                PathBuf::from("/home/u/notes/sub/c.md"),
            ]
        );
    }

    #[test]
    fn stale_replace_is_ignored() {
        let whitelist = Whitelist::new();
        assert!(whitelist.replace(PathBuf::from("/new"), vec![], 5));
        assert!(!whitelist.replace(PathBuf::from("/old"), vec![PathBuf::from("/old/x.md")], 4));
        assert_eq!(whitelist.root_dir(), Some(PathBuf::from("/new")));
        assert!(whitelist.is_empty());
        assert_eq!(whitelist.generation(), 5);
    }

    #[test]
    fn insert_reports_novelty_and_respects_root() {
        let whitelist = populated();
        assert!(whitelist.insert(PathBuf::from("/home/u/notes/d.md")));
        assert!(!whitelist.insert(PathBuf::from("/home/u/notes/d.md")));
        assert!(!whitelist.insert(PathBuf::from("/home/u/other/e.md")));
        assert_eq!(whitelist.len(), 4);
    }

    #[test]
    fn insert_without_root_is_refused() {
        let whitelist = Whitelist::new();
        assert!(!whitelist.insert(PathBuf::from("/anything.md")));
    }

    #[test]
    fn remove_clears_current_file() {
        let whitelist = populated();
        let a = PathBuf::from("/home/u/notes/a.md");
        assert!(whitelist.set_current_file(&a));
        assert!(whitelist.remove(&a));
        assert!(!whitelist.remove(&a));
        assert_eq!(whitelist.current_file(), None);
    }

    #[test]
    fn remove_under_drops_whole_subtree() {
        let whitelist = populated();
        let removed = whitelist.remove_under(Path::new("/home/u/notes/sub"));
        assert_eq!(removed, vec![PathBuf::from("/home/u/notes/sub/c.md")]);
        assert_eq!(whitelist.len(), 2);
    }

    #[test]
    fn set_current_file_requires_membership() {
        let whitelist = populated();
        assert!(!whitelist.set_current_file(Path::new("/etc/passwd")));
        assert!(whitelist.set_current_file(Path::new("/home/u/notes/b.md")));
        assert_eq!(
            whitelist.snapshot().current_file,
            Some(PathBuf::from("/home/u/notes/b.md"))
        );
    }

    #[test]
    fn display_path_is_root_relative() {
        let whitelist = populated();
        assert_eq!(
            whitelist.display_path(Path::new("/home/u/notes/sub/c.md")),
            "sub/c.md"
        );
        assert_eq!(whitelist.display_path(Path::new("/tmp/x.md")), "/tmp/x.md");
    }
}
