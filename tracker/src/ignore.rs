//! Gitignore-lite filter.
//!
//! Each workspace root contributes the patterns of its top-level
//! `.gitignore`. This is intentionally a subset of git's rules:
//!
//! - `*` matches within one path component, `**` across components, `?` one
//!   non-separator character
//! - a leading `!` negates a pattern
//! - every pattern matches at any component boundary, and a match on a
//!   directory covers everything below it
//! - a leading or trailing `/` is ignored (no anchoring, no directory-only
//!   patterns)
//!
//! Patterns are evaluated in file order and the last match decides, so
//!
//! ```text
//! *.log
//! !keep.log
//! ```
//!
//! ignores `foo.log` but keeps `keep.log` tracked.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

/// Name of the per-workspace ignore file.
pub const GITIGNORE_FILE: &str = ".gitignore";

/// A single compiled pattern.
#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    matcher: GlobSet,
    negated: bool,
}

impl Rule {
    /// Compiles one `.gitignore` line. Returns `None` for blank lines and
    /// comments.
    fn parse(line: &str) -> Option<Result<Self, globset::Error>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let body = body.trim_start_matches('/').trim_end_matches('/');
        if body.is_empty() {
            return None;
        }

        let base = if body.starts_with("**/") {
            body.to_string()
        } else {
            format!("**/{body}")
        };

        Some(Self::compile(&base).map(|matcher| Self {
            pattern: line.to_string(),
            matcher,
            negated,
        }))
    }

    fn compile(base: &str) -> Result<GlobSet, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for glob in [base.to_string(), format!("{base}/**")] {
            builder.add(GlobBuilder::new(&glob).literal_separator(true).build()?);
        }
        builder.build()
    }

    fn is_match(&self, relative: &Path) -> bool {
        self.matcher.is_match(relative)
    }
}

/// Patterns of one workspace root.
#[derive(Debug, Clone)]
struct WorkspaceRules {
    root: PathBuf,
    rules: Vec<Rule>,
}

impl WorkspaceRules {
    fn load(root: &Path) -> Self {
        let path = root.join(GITIGNORE_FILE);
        let rules = match fs::read_to_string(&path) {
            Ok(contents) => parse_rules(&contents),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No readable .gitignore, nothing ignored");
                Vec::new()
            }
        };
        debug!(root = %root.display(), rules = rules.len(), "Loaded ignore rules");
        Self {
            root: root.to_path_buf(),
            rules,
        }
    }
}

fn parse_rules(contents: &str) -> Vec<Rule> {
    contents
        .lines()
        .filter_map(Rule::parse)
        .filter_map(|parsed| match parsed {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(error = %e, "Skipping invalid ignore pattern");
                None
            }
        })
        .collect()
}

/// Ignore filter over every workspace root.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    workspaces: Vec<WorkspaceRules>,
}

impl IgnoreFilter {
    /// Reads `<root>/.gitignore` for every workspace root.
    #[must_use]
    pub fn load(roots: &[PathBuf]) -> Self {
        Self {
            workspaces: roots.iter().map(|root| WorkspaceRules::load(root)).collect(),
        }
    }

    /// Returns true if `path` is ignored by its workspace's patterns.
    ///
    /// Paths outside every workspace root are never ignored.
    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Some(workspace) = self.workspace_for(path) else {
            return false;
        };
        let Ok(relative) = path.strip_prefix(&workspace.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        workspace
            .rules
            .iter()
            .rev()
            .find(|rule| rule.is_match(relative))
            .is_some_and(|rule| !rule.negated)
    }

    /// Re-reads the `.gitignore` at `path` and replaces the patterns of the
    /// workspace it belongs to.
    ///
    /// Returns false if `path` is not the top-level `.gitignore` of a known
    /// workspace.
    pub fn reload(&mut self, path: &Path) -> bool {
        if !is_gitignore(path) {
            return false;
        }
        let Some(parent) = path.parent() else {
            return false;
        };
        let Some(workspace) = self.workspaces.iter_mut().find(|w| w.root == parent) else {
            return false;
        };

        *workspace = WorkspaceRules::load(parent);
        info!(
            root = %parent.display(),
            rules = workspace.rules.len(),
            "Reloaded ignore rules"
        );
        true
    }

    /// Returns the patterns loaded for `root`, in file order.
    #[must_use]
    pub fn patterns(&self, root: &Path) -> Vec<&str> {
        self.workspaces
            .iter()
            .find(|w| w.root == root)
            .map(|w| w.rules.iter().map(|r| r.pattern.as_str()).collect())
            .unwrap_or_default()
    }

    fn workspace_for(&self, path: &Path) -> Option<&WorkspaceRules> {
        self.workspaces
            .iter()
            .filter(|w| path.starts_with(&w.root))
            .max_by_key(|w| w.root.components().count())
    }
}

/// Returns true if `path` names a `.gitignore` file.
#[must_use]
pub fn is_gitignore(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == GITIGNORE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(gitignore: &str) -> (TempDir, IgnoreFilter) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(GITIGNORE_FILE), gitignore).unwrap();
        let filter = IgnoreFilter::load(&[dir.path().to_path_buf()]);
        (dir, filter)
    }

    #[test]
    fn test_star_pattern_matches_extension() {
        let (dir, filter) = workspace("*.log\n");
        assert!(filter.is_ignored(&dir.path().join("foo.log")));
        assert!(filter.is_ignored(&dir.path().join("logs/deep/bar.log")));
        assert!(!filter.is_ignored(&dir.path().join("src/main.rs")));
    }

    #[test]
    fn test_negation_unignores_exact_file() {
        let (dir, filter) = workspace("*.log\n!keep.log\n");
        assert!(filter.is_ignored(&dir.path().join("foo.log")));
        assert!(!filter.is_ignored(&dir.path().join("keep.log")));
        assert!(filter.is_ignored(&dir.path().join("mykeep.log")));
    }

    #[test]
    fn test_later_pattern_overrides_earlier_negation() {
        let (dir, filter) = workspace("!keep.log\n*.log\n");
        assert!(filter.is_ignored(&dir.path().join("keep.log")));
    }

    #[test]
    fn test_directory_pattern_covers_contents() {
        let (dir, filter) = workspace("# build output\ntarget/\nnode_modules\n");
        assert!(filter.is_ignored(&dir.path().join("target/debug/app")));
        assert!(filter.is_ignored(&dir.path().join("web/node_modules/x/index.js")));
        assert!(!filter.is_ignored(&dir.path().join("src/target.rs")));
    }

    #[test]
    fn test_double_star_and_question_mark() {
        let (dir, filter) = workspace("docs/**/*.tmp\nfile?.txt\n");
        assert!(filter.is_ignored(&dir.path().join("docs/a/b/c.tmp")));
        assert!(filter.is_ignored(&dir.path().join("file1.txt")));
        assert!(!filter.is_ignored(&dir.path().join("file10.txt")));
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let (dir, filter) = workspace("src/*.rs\n");
        assert!(filter.is_ignored(&dir.path().join("src/lib.rs")));
        assert!(!filter.is_ignored(&dir.path().join("src/nested/lib.rs")));
    }

    #[test]
    fn test_missing_gitignore_ignores_nothing() {
        let dir = TempDir::new().unwrap();
        let filter = IgnoreFilter::load(&[dir.path().to_path_buf()]);
        assert!(!filter.is_ignored(&dir.path().join("anything.log")));
    }

    #[test]
    fn test_path_outside_workspaces_never_ignored() {
        let (_dir, filter) = workspace("*\n");
        assert!(!filter.is_ignored(Path::new("/somewhere/else/file.rs")));
    }

    #[test]
    fn test_reload_replaces_workspace_rules() {
        let (dir, mut filter) = workspace("*.log\n");
        let gitignore = dir.path().join(GITIGNORE_FILE);

        fs::write(&gitignore, "*.tmp\n").unwrap();
        assert!(filter.reload(&gitignore));

        assert!(!filter.is_ignored(&dir.path().join("foo.log")));
        assert!(filter.is_ignored(&dir.path().join("foo.tmp")));
        assert_eq!(filter.patterns(dir.path()), vec!["*.tmp"]);
    }

    #[test]
    fn test_reload_ignores_nested_gitignore() {
        let (dir, mut filter) = workspace("*.log\n");
        assert!(!filter.reload(&dir.path().join("sub").join(GITIGNORE_FILE)));
        assert!(!filter.reload(&dir.path().join("Cargo.toml")));
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let (dir, filter) = workspace("[unclosed\n*.log\n");
        assert_eq!(filter.patterns(dir.path()), vec!["*.log"]);
        assert!(filter.is_ignored(&dir.path().join("a.log")));
    }
}
