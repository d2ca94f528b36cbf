//! Path containment for every filesystem operation in the crate.
//!
//! [`PathBoundary`] is the single choke point that decides whether a path may
//! be watched, listed, read or served. A path is accepted only if, after `~`
//! expansion, lexical cleanup and full symlink resolution, it lives under the
//! boundary root (the user's home directory in production).
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use livemark_core::boundary::PathBoundary;
//!
//! let boundary = PathBoundary::from_home()?;
//! let notes = boundary.validate("~/notes/todo.md")?;
//! assert!(notes.starts_with(boundary.root()));
//!
//! // Escapes are rejected after symlinks are resolved.
//! assert!(boundary.validate_from("../../etc/passwd", Path::new("/tmp")).is_err());
//! # Ok::<(), livemark_core::boundary::BoundaryError>(())
//! ```

use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors produced when a path fails the containment rule.
#[derive(Error, Debug)]
pub enum BoundaryError {
    /// The resolved path is not under the boundary root.
    #[error("path is outside the allowed root: {0}")]
    OutsideBoundary(PathBuf),

    /// The path (or a symlink along it) could not be resolved.
    #[error("failed to resolve {path}: {source}")]
    Unresolvable {
        /// The cleaned, absolute path that failed to resolve.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The boundary root itself is missing or not a directory.
    #[error("boundary root is not a usable directory: {0}")]
    InvalidRoot(PathBuf),

    /// The home directory could not be determined.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// A symlink target that passed the containment check.
#[derive(Debug)]
pub struct ResolvedLink {
    /// The fully resolved target path.
    pub target: PathBuf,
    /// Metadata of the target (not of the link itself).
    pub metadata: Metadata,
}

/// Validates and canonicalizes paths against a single root directory.
///
/// The root is canonicalized once at construction and never changes. A
/// leading `~` in a validated path expands to the root, which matches the
/// production setup where the root is the home directory.
#[derive(Debug, Clone)]
pub struct PathBoundary {
    root: PathBuf,
}

impl PathBoundary {
    /// Creates a boundary rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::InvalidRoot`] if `root` does not resolve to
    /// an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, BoundaryError> {
        let root = root.as_ref();
        let canonical =
            fs::canonicalize(root).map_err(|_| BoundaryError::InvalidRoot(root.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(BoundaryError::InvalidRoot(canonical));
        }

        debug!(root = %canonical.display(), "Path boundary established");
        Ok(Self { root: canonical })
    }

    /// Creates a boundary rooted at the current user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::NoHomeDirectory`] if no home directory is
    /// known, or [`BoundaryError::InvalidRoot`] if it cannot be resolved.
    pub fn from_home() -> Result<Self, BoundaryError> {
        let base_dirs = BaseDirs::new().ok_or(BoundaryError::NoHomeDirectory)?;
        Self::new(base_dirs.home_dir())
    }

    /// Returns the canonical boundary root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `true` if an already-resolved path lies under the root.
    #[must_use]
    pub fn contains(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.root)
    }

    /// Validates `path`, resolving relative paths against the boundary root.
    ///
    /// # Errors
    ///
    /// See [`validate_from`](Self::validate_from).
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf, BoundaryError> {
        self.validate_from(path, &self.root)
    }

    /// Validates `path`, resolving relative paths against `base`.
    ///
    /// Expands a leading `~`, removes `.` and `..` segments, makes the path
    /// absolute, resolves every symlink and finally checks containment.
    ///
    /// # Errors
    ///
    /// - [`BoundaryError::Unresolvable`] if the path does not exist or a
    ///   symlink along it is dangling
    /// - [`BoundaryError::OutsideBoundary`] if the resolved path escapes
    pub fn validate_from(
        &self,
        path: impl AsRef<Path>,
        base: &Path,
    ) -> Result<PathBuf, BoundaryError> {
        let absolute = self.absolutize(path.as_ref(), base);
        let resolved = fs::canonicalize(&absolute).map_err(|source| {
            BoundaryError::Unresolvable {
                path: absolute.clone(),
                source,
            }
        })?;
        self.check_contained(resolved)
    }

    /// Like [`validate`](Self::validate), but tolerates a path that does not
    /// exist yet.
    ///
    /// The deepest existing ancestor is canonicalized and the missing tail is
    /// appended back, so a record about a file that is about to be created
    /// keys to the same path the watcher will later report.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::OutsideBoundary`] if the result escapes the
    /// root, or [`BoundaryError::Unresolvable`] if no ancestor exists.
    pub fn resolve_lenient(&self, path: impl AsRef<Path>) -> Result<PathBuf, BoundaryError> {
        let absolute = self.absolutize(path.as_ref(), &self.root);
        let mut missing: Vec<OsString> = Vec::new();
        let mut existing = absolute.as_path();

        loop {
            match fs::canonicalize(existing) {
                Ok(mut resolved) => {
                    for segment in missing.iter().rev() {
                        resolved.push(segment);
                    }
                    return self.check_contained(resolved);
                }
                Err(source) => match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => {
                        return Err(BoundaryError::Unresolvable {
                            path: absolute.clone(),
                            source,
                        })
                    }
                },
            }
        }
    }

    /// Resolves a symlink met during a tree walk.
    ///
    /// Returns the resolved target and its metadata if the target is inside
    /// the boundary, or `None` if it escapes or cannot be resolved. Never
    /// fails: a dangling link is logged and skipped.
    #[must_use]
    pub fn validate_symlink_node(&self, path: &Path) -> Option<ResolvedLink> {
        let target = match fs::canonicalize(path) {
            Ok(target) => target,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unresolvable symlink");
                return None;
            }
        };

        if !self.contains(&target) {
            debug!(
                path = %path.display(),
                target = %target.display(),
                "Skipping symlink that points outside the boundary"
            );
            return None;
        }

        match fs::metadata(&target) {
            Ok(metadata) => Some(ResolvedLink { target, metadata }),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping symlink with unreadable target");
                None
            }
        }
    }

    fn check_contained(&self, resolved: PathBuf) -> Result<PathBuf, BoundaryError> {
        if self.contains(&resolved) {
            trace!(path = %resolved.display(), "Path accepted");
            Ok(resolved)
        } else {
            debug!(path = %resolved.display(), "Path rejected: outside boundary");
            Err(BoundaryError::OutsideBoundary(resolved))
        }
    }

    fn absolutize(&self, path: &Path, base: &Path) -> PathBuf {
        let expanded = match path.strip_prefix("~") {
            Ok(rest) => self.root.join(rest),
            Err(_) => path.to_path_buf(),
        };
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        };
        clean(&joined)
    }
}

/// Removes `.` and `..` segments without touching the filesystem.
fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn boundary_in(dir: &TempDir) -> PathBoundary {
        PathBoundary::new(dir.path()).expect("temp dir is a valid root")
    }

    #[test]
    fn clean_removes_dot_segments() {
        assert_eq!(clean(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean(Path::new("/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn new_rejects_missing_root() {
        let result = PathBoundary::new("/definitely/not/a/real/root");
        assert!(matches!(result, Err(BoundaryError::InvalidRoot(_))));
    }

    #[test]
    fn new_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        assert!(matches!(
            PathBoundary::new(&file),
            Err(BoundaryError::InvalidRoot(_))
        ));
    }

    #[test]
    fn validate_accepts_file_inside_root() {
        let dir = TempDir::new().unwrap();
        let boundary = boundary_in(&dir);
        fs::create_dir(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("notes/a.md"), "# a").unwrap();

        let resolved = boundary.validate("notes/a.md").unwrap();
        assert!(resolved.starts_with(boundary.root()));
        assert!(resolved.ends_with("notes/a.md"));
    }

    #[test]
    fn validate_expands_tilde_to_root() {
        let dir = TempDir::new().unwrap();
        let boundary = boundary_in(&dir);
        fs::write(dir.path().join("readme.md"), "").unwrap();

        let resolved = boundary.validate("~/readme.md").unwrap();
        assert_eq!(resolved, boundary.root().join("readme.md"));
    }

    #[test]
    fn validate_rejects_parent_escape() {
        let dir = TempDir::new().unwrap();
        let inner = dir.path().join("inner");
        fs::create_dir(&inner).unwrap();
        fs::write(dir.path().join("secret.md"), "").unwrap();
        let boundary = PathBoundary::new(&inner).unwrap();

        let result = boundary.validate("../secret.md");
        assert!(matches!(result, Err(BoundaryError::OutsideBoundary(_))));
    }

    #[test]
    fn validate_from_uses_base_for_relative_paths() {
        let dir = TempDir::new().unwrap();
        let boundary = boundary_in(&dir);
        let sub = boundary.root().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("x.md"), "").unwrap();

        let resolved = boundary.validate_from("./x.md", &sub).unwrap();
        assert_eq!(resolved, sub.join("x.md"));
    }

    #[test]
    fn validate_reports_missing_path_as_unresolvable() {
        let dir = TempDir::new().unwrap();
        let boundary = boundary_in(&dir);

        let result = boundary.validate("missing.md");
        assert!(matches!(result, Err(BoundaryError::Unresolvable { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn validate_rejects_symlink_escaping_root() {
        let home = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("leak.md"), "").unwrap();
        std::os::unix::fs::symlink(outside.path(), home.path().join("link")).unwrap();
        let boundary = boundary_in(&home);

        let result = boundary.validate("link/leak.md");
        assert!(matches!(result, Err(BoundaryError::OutsideBoundary(_))));
    }

    #[test]
    fn resolve_lenient_accepts_not_yet_created_file() {
        let dir = TempDir::new().unwrap();
        let boundary = boundary_in(&dir);
        fs::create_dir(dir.path().join("docs")).unwrap();

        let resolved = boundary.resolve_lenient("docs/new/later.md").unwrap();
        assert_eq!(resolved, boundary.root().join("docs/new/later.md"));
    }

    #[test]
    fn resolve_lenient_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let inner = dir.path().join("inner");
        fs::create_dir(&inner).unwrap();
        let boundary = PathBoundary::new(&inner).unwrap();

        let result = boundary.resolve_lenient("../elsewhere/new.md");
        assert!(matches!(result, Err(BoundaryError::OutsideBoundary(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_node_inside_boundary_is_resolved() {
        let dir = TempDir::new().unwrap();
        let boundary = boundary_in(&dir);
        let target = boundary.root().join("real");
        fs::create_dir(&target).unwrap();
        let link = boundary.root().join("alias");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let resolved = boundary.validate_symlink_node(&link).unwrap();
        assert_eq!(resolved.target, target);
        assert!(resolved.metadata.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_node_outside_or_dangling_is_skipped() {
        let home = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let boundary = boundary_in(&home);

        let escaping = home.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &escaping).unwrap();
        assert!(boundary.validate_symlink_node(&escaping).is_none());

        let dangling = home.path().join("dangling");
        std::os::unix::fs::symlink(home.path().join("nope"), &dangling).unwrap();
        assert!(boundary.validate_symlink_node(&dangling).is_none());
    }
}
