//! Repository context resolution.
//!
//! A tracked file belongs to the innermost configured workspace root that
//! contains it. Repository metadata is read by running `git` in that root; a
//! failing command yields an empty value instead of an error, because a file
//! outside a repository (or without a remote) is still tracked.
//!
//! `git` runs through `tokio::process`, so lookups never block the event loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::types::{RepoContext, User};

/// A workspace root that is a git repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    pub name: String,
}

/// Parts extracted from a remote origin URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoIdentifierInfo {
    /// Normalized identifier (`host/owner/repo.git`).
    pub identifier: String,
    pub repo_name: String,
}

/// Normalizes a remote URL into `host/path` form.
///
/// Strips the protocol (`https://`), the user part (`git@`) and turns the
/// first `:` into `/`, so `git@github.com:acme/app.git` and
/// `https://github.com/acme/app.git` both become `github.com/acme/app.git`.
#[must_use]
pub fn normalize_repo_identifier(identifier: &str) -> String {
    let identifier = split_once_exact(identifier, "//");
    let identifier = split_once_exact(identifier, "@");
    identifier.replacen(':', "/", 1)
}

/// Returns the part after `sep` when `sep` occurs exactly once.
fn split_once_exact<'a>(s: &'a str, sep: &str) -> &'a str {
    let mut parts = s.split(sep);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(rest), None) => rest,
        _ => s,
    }
}

/// Extracts the repository name from a remote URL.
#[must_use]
pub fn repo_identifier_info(identifier: &str) -> RepoIdentifierInfo {
    let identifier = normalize_repo_identifier(identifier);
    if identifier.is_empty() {
        return RepoIdentifierInfo::default();
    }

    let parts: Vec<&str> = identifier.split(['/', '\\']).collect();
    let mut info = RepoIdentifierInfo {
        identifier: identifier.clone(),
        ..RepoIdentifierInfo::default()
    };

    if parts.len() > 2 && identifier.contains(".git") {
        let last = identifier.rsplit('/').next().unwrap_or_default();
        info.repo_name = last.split(".git").next().unwrap_or_default().to_string();
    }

    info
}

/// Runs `git` in `dir` and returns trimmed stdout, or an empty string when
/// the command fails.
async fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(output) => {
            debug!(
                dir = %dir.display(),
                command = %args.join(" "),
                status = ?output.status.code(),
                "git command failed"
            );
            String::new()
        }
        Err(e) => {
            debug!(dir = %dir.display(), command = %args.join(" "), error = %e, "Failed to run git");
            String::new()
        }
    }
}

/// Resolves workspace and repository context for file paths.
#[derive(Debug, Clone, Default)]
pub struct RepoResolver {
    roots: Vec<PathBuf>,
    /// Remote origin URL per workspace root, looked up once.
    identifiers: HashMap<PathBuf, String>,
}

impl RepoResolver {
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            identifiers: HashMap::new(),
        }
    }

    /// Configured workspace roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns the innermost workspace containing `path`, if it is a git
    /// repository.
    #[must_use]
    pub fn workspace_for(&self, path: &Path) -> Option<Workspace> {
        let root = self
            .roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())?;

        if !root.join(".git").exists() {
            return None;
        }

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Some(Workspace {
            root: root.clone(),
            name,
        })
    }

    /// Returns the remote origin URL of the repository containing `path`.
    ///
    /// `None` when the file is outside every repository or the repository
    /// has no remote.
    pub async fn identifier(&mut self, path: &Path) -> Option<String> {
        let workspace = self.workspace_for(path)?;
        let identifier = match self.identifiers.get(&workspace.root) {
            Some(identifier) => identifier.clone(),
            None => {
                let identifier =
                    git(&workspace.root, &["config", "--get", "remote.origin.url"]).await;
                self.identifiers.insert(workspace.root, identifier.clone());
                identifier
            }
        };
        (!identifier.is_empty()).then_some(identifier)
    }

    /// Reads full repository context for `path`.
    ///
    /// The cached user profile's email and display name take precedence over
    /// the git author configuration.
    pub async fn context(&mut self, path: &Path, user: Option<&User>) -> RepoContext {
        let Some(workspace) = self.workspace_for(path) else {
            return RepoContext::default();
        };
        let dir = workspace.root.as_path();
        let identifier = self.identifier(path).await.unwrap_or_default();

        let cached_email = user
            .and_then(|u| u.email.clone())
            .filter(|e| !e.is_empty());
        let cached_name = user
            .and_then(|u| u.display_name.clone())
            .filter(|n| !n.is_empty());

        let (author_email, author_name, git_branch, git_tag) = tokio::join!(
            async {
                match cached_email {
                    Some(email) => email,
                    None => git(dir, &["config", "user.email"]).await,
                }
            },
            async {
                match cached_name {
                    Some(name) => name,
                    None => git(dir, &["config", "user.name"]).await,
                }
            },
            git(dir, &["symbolic-ref", "--short", "HEAD"]),
            git(dir, &["describe", "--all"]),
        );

        RepoContext {
            project_name: workspace.name.clone(),
            project_directory: dir.display().to_string(),
            git_branch,
            repo_name: repo_identifier_info(&identifier).repo_name,
            identifier,
            author_email,
            author_name,
            git_tag,
        }
    }
}
