//! Event loop that routes editor events through the tracker components.
//!
//! ```text
//!  EditorEvent ──▶ scheme/focus gate ──▶ SessionTracker (activity, keystrokes)
//!                        │
//!                        └─▶ IgnoreFilter ──▶ Debouncer ──▶ ChangeTracker
//!  session deadline / focus lost ──▶ finalize ──▶ SyncClient::post_session
//! ```
//!
//! One task owns the [`Tracker`]; every component is mutated from that task
//! only.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::aggregator::{ChangeTracker, EditorInfo};
use crate::config::Config;
use crate::events::{Document, EditorEvent, NoticeBus, TrackerNotice};
use crate::ignore::{is_gitignore, IgnoreFilter};
use crate::repo::RepoResolver;
use crate::session::SessionTracker;
use crate::snapshot::SnapshotStore;
use crate::store::LocalStore;
use crate::sync::SyncClient;
use crate::types::User;
use crate::utils::Debouncer;

/// Extra time allowed for pending changes to flush on shutdown.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Capacity of the debounced change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1000;

/// Latest content of a changed document, waiting out the debounce window.
#[derive(Debug, Clone)]
struct PendingChange {
    content: String,
    lang: String,
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Tracker orchestrator.
#[derive(Debug)]
pub struct Tracker {
    ignore: IgnoreFilter,
    repos: RepoResolver,
    /// Present only when uncommitted change tracking is enabled.
    changes: Option<ChangeTracker>,
    session: SessionTracker,
    sync: SyncClient,
    notices: NoticeBus,
    user: Option<User>,
    debouncer: Debouncer<PathBuf, PendingChange>,
    debounced_rx: mpsc::Receiver<(PathBuf, PendingChange)>,
    debounce: Duration,
    focused: bool,
}

impl Tracker {
    /// Builds the tracker for the workspaces in `config`.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(config: &Config, store: LocalStore, sync: SyncClient, notices: NoticeBus) -> Self {
        let changes = config.track_uncommitted.then(|| {
            ChangeTracker::open(
                store.clone(),
                SnapshotStore::new(store.clone()),
                sync.clone(),
                notices.clone(),
                EditorInfo {
                    name: config.editor_name.clone(),
                    version: config.editor_version.clone(),
                },
            )
        });

        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        info!(
            workspaces = config.workspaces.len(),
            track_uncommitted = config.track_uncommitted,
            session_timeout_secs = config.session_timeout.as_secs(),
            "Tracker initialized"
        );

        Self {
            ignore: IgnoreFilter::load(&config.workspaces),
            repos: RepoResolver::new(config.workspaces.clone()),
            changes,
            session: SessionTracker::new(config.session_timeout),
            sync,
            notices,
            user: store.user_info(),
            debouncer: Debouncer::new(config.debounce, changes_tx),
            debounced_rx: changes_rx,
            debounce: config.debounce,
            focused: true,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    #[must_use]
    pub fn changes(&self) -> Option<&ChangeTracker> {
        self.changes.as_ref()
    }

    #[must_use]
    pub fn ignore(&self) -> &IgnoreFilter {
        &self.ignore
    }

    /// Runs until `events` closes or `shutdown` resolves.
    ///
    /// Debounced changes that are ready are applied before the next editor
    /// event. On exit, pending debounced changes are applied and the active
    /// session is finalized and posted.
    pub async fn run<F>(mut self, mut events: mpsc::Receiver<EditorEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!("Tracker event loop started");

        loop {
            let deadline = self.session.deadline();

            tokio::select! {
                biased;

                Some((path, change)) = self.debounced_rx.recv() => {
                    self.apply_change(&path, change).await;
                }
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Event source closed");
                        break;
                    }
                },
                () = sleep_until_deadline(deadline) => {
                    debug!("Session deadline reached");
                    self.end_session().await;
                }
            }
        }

        let grace = self.debounce + DRAIN_GRACE;
        while let Ok(Some((path, change))) =
            tokio::time::timeout(grace, self.debounced_rx.recv()).await
        {
            self.apply_change(&path, change).await;
        }
        self.end_session().await;

        info!("Tracker event loop stopped");
    }

    /// Handles one editor event.
    pub async fn handle_event(&mut self, event: EditorEvent) {
        trace!(event = event.name(), "Editor event");

        match event {
            EditorEvent::DocumentOpened(doc) | EditorEvent::DocumentClosed(doc) => {
                if self.focused && doc.is_trackable() {
                    self.touch(Some(&doc.path)).await;
                }
            }
            EditorEvent::DocumentSaved(doc) => {
                if is_gitignore(&doc.path) {
                    self.ignore.reload(&doc.path);
                }
                if let Some(change) = self.settle_pending(&doc.path).await {
                    self.apply_change(&doc.path, change).await;
                }
                if let Some(changes) = self.changes.as_mut() {
                    changes.post_change(&doc.path).await;
                }
                self.touch(Some(&doc.path)).await;
            }
            EditorEvent::DocumentChanged(doc) => self.on_document_changed(doc).await,
            EditorEvent::FilesRenamed { files } => {
                for file in &files {
                    // The old path's latest edit is counted before its record moves
                    if let Some(change) = self.settle_pending(&file.old_path).await {
                        self.apply_change(&file.old_path, change).await;
                    }
                    if let Some(changes) = self.changes.as_mut() {
                        changes.on_rename(&file.old_path, &file.new_path);
                    }
                    self.touch(Some(&file.new_path)).await;
                }
            }
            EditorEvent::FilesDeleted { paths } => {
                for path in &paths {
                    if self.settle_pending(path).await.is_some() {
                        trace!(path = %path.display(), "Dropped pending change of deleted file");
                    }
                    if let Some(changes) = self.changes.as_mut() {
                        changes.on_delete(path).await;
                    }
                    self.touch(Some(path)).await;
                }
            }
            EditorEvent::VisibleEditors { documents } => self.on_visible_editors(&documents),
            EditorEvent::TerminalInteracted => self.touch(None).await,
            EditorEvent::WindowFocus { focused } => {
                self.focused = focused;
                if !focused {
                    self.end_session().await;
                }
            }
        }
    }

    async fn on_document_changed(&mut self, doc: Document) {
        if is_gitignore(&doc.path) {
            self.ignore.reload(&doc.path);
        }
        if !doc.is_trackable() {
            return;
        }

        let repo = self.repos.identifier(&doc.path).await;
        self.session.record_keystroke(repo.as_deref());

        if self.changes.is_none() || self.ignore.is_ignored(&doc.path) {
            return;
        }
        let Some(content) = doc.content else {
            trace!(path = %doc.path.display(), "Change without content, not aggregated");
            return;
        };
        let change = PendingChange {
            content,
            lang: doc.lang,
        };
        if let Err(e) = self.debouncer.send(doc.path, change).await {
            warn!(error = %e, "Failed to queue document change");
        }
    }

    fn on_visible_editors(&mut self, documents: &[Document]) {
        let Some(changes) = self.changes.as_mut() else {
            return;
        };
        for doc in documents {
            if doc.scheme != "file" || self.ignore.is_ignored(&doc.path) {
                continue;
            }
            if let Some(content) = doc.content.as_deref() {
                if changes.observe_visible(&doc.path, content) {
                    trace!(path = %doc.path.display(), "Captured baseline");
                }
            }
        }
    }

    /// Takes the change still waiting out the debounce window for `path`,
    /// after applying every change the debouncer already emitted.
    ///
    /// Afterwards nothing for `path` is left in flight.
    async fn settle_pending(&mut self, path: &Path) -> Option<PendingChange> {
        let pending = match self.debouncer.cancel(path.to_path_buf()).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to cancel pending change");
                None
            }
        };
        while let Ok((ready_path, change)) = self.debounced_rx.try_recv() {
            self.apply_change(&ready_path, change).await;
        }
        pending
    }

    /// Marks activity, resolving the repository of `path` when given.
    async fn touch(&mut self, path: Option<&Path>) {
        let repo = match path {
            Some(path) => self.repos.identifier(path).await,
            None => None,
        };
        self.session.record_activity(repo.as_deref());
    }

    /// Aggregates a debounced document change.
    async fn apply_change(&mut self, path: &Path, change: PendingChange) {
        if self.changes.is_none() {
            return;
        }
        let context = self.repos.context(path, self.user.as_ref()).await;
        if let Some(changes) = self.changes.as_mut() {
            changes.record_change(path, &change.content, &change.lang, &context);
        }
    }

    /// Finalizes the active session and posts it.
    ///
    /// On success the day's totals are re-fetched and broadcast; on failure
    /// the payload is dropped.
    pub async fn end_session(&mut self) {
        let Some(payload) = self.session.finalize() else {
            return;
        };

        match self.sync.post_session(&payload).await {
            Ok(()) => {
                let totals = self.sync.time_tracking_today().await;
                self.notices.publish(TrackerNotice::TimeTotalsUpdated {
                    code_time: totals.code_time,
                    vscode_time: totals.vscode_time,
                });
            }
            Err(e) => warn!(
                error = %e,
                kpm = payload.kpm,
                vscode_time = payload.vscode_time,
                "Dropping session that could not be posted"
            ),
        }
    }
}
