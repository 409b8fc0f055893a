//! Filesystem watcher for standalone mode.
//!
//! Watches every workspace root recursively and translates filesystem
//! notifications into the same [`EditorEvent`]s an editor extension sends on
//! stdin:
//!
//! | notify event            | editor event                               |
//! |-------------------------|--------------------------------------------|
//! | create file             | `visibleEditors` + `documentOpened`        |
//! | modify data             | `documentChanged` (with the file content)  |
//! | rename (both paths)     | `filesRenamed`                             |
//! | remove / rename-from    | `filesDeleted`                             |
//! | rename-to               | treated as a create                        |
//!
//! Anything under a `.git` directory is skipped.
//!
//! # Architecture
//!
//! The notify callback only classifies events and forwards them through an
//! internal channel to an async task, which reads file contents and emits
//! the editor events. On startup the task first emits one `visibleEditors`
//! event for the existing files so they get a baseline before their first
//! change.

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::events::{Document, EditorEvent, RenamedFile};
use crate::ignore::IgnoreFilter;

/// Files larger than this get no baseline from the startup scan.
const MAX_BASELINE_BYTES: u64 = 1024 * 1024;

/// Capacity of the channel between the notify callback and the async task.
const INTERNAL_CHANNEL_CAPACITY: usize = 1000;

/// Errors that can occur while setting up the watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The notify backend failed.
    #[error("failed to create watcher: {0}")]
    Notify(#[from] notify::Error),

    /// The watcher could not be started.
    #[error("failed to initialize watcher: {0}")]
    InitError(String),

    /// A workspace root does not exist.
    #[error("workspace root does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// I/O error while scanning a workspace.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatcherError>;

/// A classified filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FsChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Recursive watcher over the workspace roots.
#[derive(Debug)]
pub struct WorkspaceWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl WorkspaceWatcher {
    /// Starts watching `roots` and emitting editor events on `events`.
    ///
    /// Existing files that `ignore` does not exclude are read once and
    /// emitted as a single `visibleEditors` event before any change events.
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `roots` is empty, a root does not exist, or the
    /// notify backend cannot watch a root.
    pub fn new(
        roots: &[PathBuf],
        ignore: &IgnoreFilter,
        events: mpsc::Sender<EditorEvent>,
    ) -> Result<Self> {
        if roots.is_empty() {
            return Err(WatcherError::InitError(
                "no workspace roots to watch".to_string(),
            ));
        }
        if let Some(missing) = roots.iter().find(|root| !root.is_dir()) {
            return Err(WatcherError::DirectoryNotFound(missing.clone()));
        }

        let mut documents = Vec::new();
        for root in roots {
            scan_workspace(root, ignore, &mut documents)?;
        }
        info!(
            roots = roots.len(),
            files = documents.len(),
            "Scanned workspace files"
        );

        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            if !documents.is_empty()
                && events
                    .send(EditorEvent::VisibleEditors { documents })
                    .await
                    .is_err()
            {
                return;
            }
            process_changes(internal_rx, events).await;
        });

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| handle_notify_event(res, &internal_tx),
            Config::default(),
        )?;
        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            debug!(root = %root.display(), "Started recursive watch");
        }

        Ok(Self {
            _watcher: watcher,
            roots: roots.to_vec(),
        })
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

fn in_git_dir(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == OsStr::new(".git")))
}

/// Maps a notify event to the changes the tracker cares about.
fn classify(event: &Event) -> Vec<FsChange> {
    let paths: Vec<&PathBuf> = event.paths.iter().filter(|p| !in_git_dir(p)).collect();

    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => paths
            .into_iter()
            .map(|p| FsChange::Created(p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => paths
            .into_iter()
            .map(|p| FsChange::Modified(p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => match (in_git_dir(from), in_git_dir(to)) {
                (false, false) => vec![FsChange::Renamed {
                    from: from.clone(),
                    to: to.clone(),
                }],
                (false, true) => vec![FsChange::Removed(from.clone())],
                (true, false) => vec![FsChange::Created(to.clone())],
                (true, true) => Vec::new(),
            },
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From))
        | EventKind::Remove(RemoveKind::File | RemoveKind::Folder | RemoveKind::Any) => paths
            .into_iter()
            .map(|p| FsChange::Removed(p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .into_iter()
            .map(|p| FsChange::Created(p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn handle_notify_event(res: notify::Result<Event>, internal_tx: &mpsc::Sender<FsChange>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for change in classify(&event) {
        // Never block the notify thread
        if let Err(e) = internal_tx.try_send(change) {
            warn!(error = %e, "Failed to queue file change, channel may be full");
        }
    }
}

fn document(path: PathBuf, content: String) -> Document {
    let lang = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    Document {
        path,
        scheme: "file".to_string(),
        lang,
        content: Some(content),
    }
}

async fn read_document(path: &Path) -> Option<Document> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(document(path.to_path_buf(), content)),
        Err(e) => {
            trace!(path = %path.display(), error = %e, "Skipping unreadable file");
            None
        }
    }
}

async fn process_changes(mut rx: mpsc::Receiver<FsChange>, events: mpsc::Sender<EditorEvent>) {
    while let Some(change) = rx.recv().await {
        let outgoing = match change {
            FsChange::Created(path) => match read_document(&path).await {
                Some(doc) => vec![
                    EditorEvent::VisibleEditors {
                        documents: vec![doc.clone()],
                    },
                    EditorEvent::DocumentOpened(doc),
                ],
                None => Vec::new(),
            },
            FsChange::Modified(path) => read_document(&path)
                .await
                .map(EditorEvent::DocumentChanged)
                .into_iter()
                .collect(),
            FsChange::Removed(path) => vec![EditorEvent::FilesDeleted { paths: vec![path] }],
            FsChange::Renamed { from, to } => vec![EditorEvent::FilesRenamed {
                files: vec![RenamedFile {
                    old_path: from,
                    new_path: to,
                }],
            }],
        };

        for event in outgoing {
            if events.send(event).await.is_err() {
                debug!("Event receiver dropped, stopping watcher task");
                return;
            }
        }
    }

    debug!("File change processor shutting down");
}

/// Collects readable text files under `dir` that are not ignored.
fn scan_workspace(dir: &Path, ignore: &IgnoreFilter, documents: &mut Vec<Document>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(dir = %dir.display(), "Permission denied, skipping directory");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name() == ".git" || ignore.is_ignored(&path) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            scan_workspace(&path, ignore, documents)?;
        } else if file_type.is_file() {
            if entry.metadata().is_ok_and(|m| m.len() > MAX_BASELINE_BYTES) {
                trace!(path = %path.display(), "Skipping large file");
                continue;
            }
            // Binary files fail UTF-8 decoding and get no baseline
            if let Ok(content) = fs::read_to_string(&path) {
                documents.push(document(path, content));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_classify_create_modify_remove() {
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), &["/w/a.rs"])),
            vec![FsChange::Created("/w/a.rs".into())]
        );
        assert_eq!(
            classify(&event(EventKind::Modify(ModifyKind::Any), &["/w/a.rs"])),
            vec![FsChange::Modified("/w/a.rs".into())]
        );
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::File), &["/w/a.rs"])),
            vec![FsChange::Removed("/w/a.rs".into())]
        );
        assert!(classify(&event(EventKind::Create(CreateKind::Folder), &["/w/src"])).is_empty());
    }

    #[test]
    fn test_classify_renames() {
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/w/a.rs", "/w/b.rs"]
            )),
            vec![FsChange::Renamed {
                from: "/w/a.rs".into(),
                to: "/w/b.rs".into(),
            }]
        );
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/w/a.rs"]
            )),
            vec![FsChange::Removed("/w/a.rs".into())]
        );
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/w/b.rs"]
            )),
            vec![FsChange::Created("/w/b.rs".into())]
        );
    }

    #[test]
    fn test_classify_skips_git_dir() {
        assert!(classify(&event(
            EventKind::Modify(ModifyKind::Any),
            &["/w/.git/index"]
        ))
        .is_empty());

        // Editors that save via a temp file inside .git still count as a create
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/w/.git/tmp", "/w/a.rs"]
            )),
            vec![FsChange::Created("/w/a.rs".into())]
        );

        assert_eq!(
            classify(&event(EventKind::Modify(ModifyKind::Any), &["/w/.gitignore"])),
            vec![FsChange::Modified("/w/.gitignore".into())]
        );
    }

    #[test]
    fn test_document_lang_from_extension() {
        let doc = document("/w/src/main.rs".into(), "fn main() {}".to_string());
        assert_eq!(doc.lang, "rs");
        assert_eq!(doc.scheme, "file");
        assert!(doc.is_trackable());
    }

    #[test]
    fn test_scan_skips_git_and_ignored() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "target/\n").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}\n").unwrap();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::write(root.join("target/debug/out.rs"), "x").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(root.join("blob.bin"), [0xff_u8, 0xfe, 0x00]).unwrap();

        let ignore = IgnoreFilter::load(&[root.to_path_buf()]);
        let mut documents = Vec::new();
        scan_workspace(root, &ignore, &mut documents).unwrap();

        let mut names: Vec<String> = documents
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".gitignore", "main.rs"]);
    }

    #[tokio::test]
    async fn test_watcher_rejects_missing_root() {
        let (tx, _rx) = mpsc::channel(10);
        let result = WorkspaceWatcher::new(
            &[PathBuf::from("/nonexistent/devboost/root")],
            &IgnoreFilter::default(),
            tx,
        );
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn test_watcher_rejects_empty_roots() {
        let (tx, _rx) = mpsc::channel(10);
        let result = WorkspaceWatcher::new(&[], &IgnoreFilter::default(), tx);
        assert!(matches!(result, Err(WatcherError::InitError(_))));
    }

    #[tokio::test]
    async fn test_watcher_emits_initial_baselines() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("lib.rs"), "pub fn a() {}\n").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let watcher = WorkspaceWatcher::new(&[root.clone()], &IgnoreFilter::default(), tx).unwrap();
        assert_eq!(watcher.roots(), &[root.clone()]);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("initial event")
            .expect("channel open");
        match event {
            EditorEvent::VisibleEditors { documents } => {
                assert_eq!(documents.len(), 1);
                assert_eq!(documents[0].path, root.join("lib.rs"));
                assert_eq!(documents[0].content.as_deref(), Some("pub fn a() {}\n"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_watcher_error_display() {
        let err = WatcherError::DirectoryNotFound(PathBuf::from("/missing"));
        assert_eq!(err.to_string(), "workspace root does not exist: /missing");
    }
}
