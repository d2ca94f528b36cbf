//! Directory exclusion rules for scanning and watching.
//!
//! A directory is excluded when any of these hold, checked in order:
//!
//! 1. its name is in the built-in set of build/dependency directories
//! 2. it is hidden (leading `.`), unless it is [`VISIBLE_HIDDEN_DIR`]
//! 3. it matches one of the custom globs from the root's [`IGNORE_FILE_NAME`]
//!
//! Custom patterns are a best-effort convenience: invalid lines are warned
//! about (a capped number of times) and dropped, never treated as fatal.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

/// Per-root file holding custom exclusion globs, one per line.
pub const IGNORE_FILE_NAME: &str = ".livemarkignore";

/// The single hidden directory that stays visible.
pub const VISIBLE_HIDDEN_DIR: &str = ".claude";

/// Longest accepted custom pattern, in bytes.
const MAX_PATTERN_LEN: usize = 256;

/// Warnings emitted per pattern file before the rest are suppressed.
const MAX_PATTERN_WARNINGS: usize = 5;

const BUILTIN_EXCLUSIONS: &[&str] = &[
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "build",
    "dist",
    "out",
    "__pycache__",
    "venv",
    "env",
    "Pods",
    "DerivedData",
];

/// A compiled set of custom directory-name globs.
#[derive(Debug, Clone)]
pub struct IgnorePatterns {
    globs: GlobSet,
    sources: Vec<String>,
}

impl Default for IgnorePatterns {
    fn default() -> Self {
        Self {
            globs: GlobSet::empty(),
            sources: Vec::new(),
        }
    }
}

impl IgnorePatterns {
    /// Parses pattern-file content, skipping comments, blank lines and any
    /// pattern that fails validation.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut sources = Vec::new();
        let mut warnings = 0usize;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match validate_pattern(line) {
                Ok(glob) => {
                    builder.add(glob);
                    sources.push(line.to_string());
                }
                Err(reason) => {
                    warnings += 1;
                    if warnings <= MAX_PATTERN_WARNINGS {
                        warn!(line = index + 1, pattern = %line, reason, "Ignoring invalid pattern");
                    } else if warnings == MAX_PATTERN_WARNINGS + 1 {
                        warn!("Too many invalid ignore patterns, suppressing further warnings");
                    }
                }
            }
        }

        match builder.build() {
            Ok(globs) => Self { globs, sources },
            Err(e) => {
                warn!(error = %e, "Failed to compile ignore patterns, using none");
                Self::default()
            }
        }
    }

    /// Returns `true` if `name` matches any pattern.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        !self.sources.is_empty() && self.globs.is_match(name)
    }

    /// The accepted pattern strings, in file order.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.sources
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn validate_pattern(pattern: &str) -> Result<Glob, &'static str> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err("pattern too long");
    }
    if pattern.contains('/') || pattern.contains('\\') {
        return Err("pattern must not contain a path separator");
    }
    Glob::new(pattern).map_err(|_| "invalid glob syntax")
}

#[derive(Debug)]
struct CachedPatterns {
    root_dir: PathBuf,
    patterns: Arc<IgnorePatterns>,
}

/// Built-in plus per-root custom exclusion rules.
///
/// Patterns are cached for a single root: only one root is active at a time,
/// so a query for a different root simply replaces the entry.
#[derive(Debug)]
pub struct IgnoreRules {
    builtins: HashSet<&'static str>,
    cache: Mutex<Option<CachedPatterns>>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new()
    }
}

impl IgnoreRules {
    #[must_use]
    pub fn new() -> Self {
        Self {
            builtins: BUILTIN_EXCLUSIONS.iter().copied().collect(),
            cache: Mutex::new(None),
        }
    }

    /// Decides whether a directory named `dir_name` is skipped.
    #[must_use]
    pub fn is_excluded(&self, dir_name: &str, patterns: &IgnorePatterns) -> bool {
        if self.builtins.contains(dir_name) {
            return true;
        }
        if dir_name.starts_with('.') && dir_name != VISIBLE_HIDDEN_DIR {
            return true;
        }
        patterns.matches(dir_name)
    }

    /// Returns the custom patterns for `root_dir`, reading the pattern file
    /// only when the cached root differs.
    pub fn load_patterns(&self, root_dir: &Path) -> Arc<IgnorePatterns> {
        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.as_ref().filter(|c| c.root_dir == root_dir) {
                return Arc::clone(&cached.patterns);
            }
        }

        let patterns = Arc::new(read_pattern_file(root_dir));

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        *cache = Some(CachedPatterns {
            root_dir: root_dir.to_path_buf(),
            patterns: Arc::clone(&patterns),
        });
        patterns
    }

    /// Drops the cached patterns so the next load re-reads the file.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn read_pattern_file(root_dir: &Path) -> IgnorePatterns {
    let path = root_dir.join(IGNORE_FILE_NAME);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let patterns = IgnorePatterns::parse(&content);
            debug!(
                path = %path.display(),
                count = patterns.patterns().len(),
                "Loaded custom ignore patterns"
            );
            patterns
        }
        Err(e) if e.kind() == ErrorKind::NotFound => IgnorePatterns::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read ignore file");
            IgnorePatterns::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_exclusion_applies_without_custom_patterns() {
        let rules = IgnoreRules::new();
        let empty = IgnorePatterns::default();

        assert!(rules.is_excluded("vendor", &empty));
        assert!(rules.is_excluded("node_modules", &empty));
        assert!(!rules.is_excluded("test_output", &empty));
        assert!(!rules.is_excluded("docs", &empty));
    }

    #[test]
    fn custom_pattern_excludes_only_when_loaded() {
        let rules = IgnoreRules::new();
        let custom = IgnorePatterns::parse("test_*\n");

        assert!(rules.is_excluded("test_output", &custom));
        assert!(rules.is_excluded("vendor", &custom));
        assert!(!rules.is_excluded("tests", &custom));
    }

    #[test]
    fn hidden_directories_are_excluded_except_one() {
        let rules = IgnoreRules::new();
        let empty = IgnorePatterns::default();

        assert!(rules.is_excluded(".git", &empty));
        assert!(rules.is_excluded(".cache", &empty));
        assert!(!rules.is_excluded(VISIBLE_HIDDEN_DIR, &empty));
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let patterns = IgnorePatterns::parse("# drafts\n\n  drafts  \n*.bak\n");
        assert_eq!(patterns.patterns(), &["drafts".to_string(), "*.bak".to_string()]);
        assert!(patterns.matches("drafts"));
        assert!(patterns.matches("old.bak"));
    }

    #[test]
    fn parse_rejects_separators_overlong_and_bad_syntax() {
        let long = "x".repeat(MAX_PATTERN_LEN + 1);
        let content = format!("docs/private\nback\\slash\n{long}\n[unclosed\nkeep_*\n");

        let patterns = IgnorePatterns::parse(&content);
        assert_eq!(patterns.patterns(), &["keep_*".to_string()]);
    }

    #[test]
    fn parse_survives_flood_of_invalid_lines() {
        let content = "bad/one\n".repeat(50);
        let patterns = IgnorePatterns::parse(&content);
        assert!(patterns.is_empty());
        assert!(!patterns.matches("bad"));
    }

    #[test]
    fn load_patterns_reads_file_and_defaults_to_empty() {
        let with_file = TempDir::new().unwrap();
        fs::write(with_file.path().join(IGNORE_FILE_NAME), "scratch\n").unwrap();
        let without_file = TempDir::new().unwrap();
        let rules = IgnoreRules::new();

        assert!(rules.load_patterns(with_file.path()).matches("scratch"));
        assert!(rules.load_patterns(without_file.path()).is_empty());
    }

    #[test]
    fn load_patterns_caches_until_root_changes() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let file = first.path().join(IGNORE_FILE_NAME);
        fs::write(&file, "alpha\n").unwrap();
        let rules = IgnoreRules::new();

        let loaded = rules.load_patterns(first.path());
        assert!(loaded.matches("alpha"));

        // Same root: the cached copy wins over the edited file.
        fs::write(&file, "beta\n").unwrap();
        assert!(rules.load_patterns(first.path()).matches("alpha"));

        // A different root evicts the entry, so coming back re-reads.
        rules.load_patterns(second.path());
        let reloaded = rules.load_patterns(first.path());
        assert!(reloaded.matches("beta"));
        assert!(!reloaded.matches("alpha"));
    }

    #[test]
    fn invalidate_forces_reload() {
        let root = TempDir::new().unwrap();
        let file = root.path().join(IGNORE_FILE_NAME);
        fs::write(&file, "alpha\n").unwrap();
        let rules = IgnoreRules::new();
        rules.load_patterns(root.path());

        fs::write(&file, "beta\n").unwrap();
        rules.invalidate();
        assert!(rules.load_patterns(root.path()).matches("beta"));
    }
}
