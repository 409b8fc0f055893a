//! Per-day aggregation of uncommitted changes.
//!
//! [`ChangeTracker`] owns today's [`CodeChangesData`]. Every mutation diffs
//! against the file's baseline snapshot, replaces the file's counters with the
//! fresh totals, recomputes the summary, persists the aggregate and publishes
//! [`TrackerNotice::SummaryUpdated`].
//!
//! Counters are never accumulated across edits: after any sequence of edits
//! they equal the diff between the baseline and the latest content.

use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::diff::{char_diff, line_diff};
use crate::events::{NoticeBus, TrackerNotice};
use crate::snapshot::SnapshotStore;
use crate::store::{today, LocalStore};
use crate::sync::SyncClient;
use crate::types::{
    now_millis, CodeChangeSummary, CodeChangesData, FileChangeRecord, RepoContext,
    UNCOMMITTED_CHANGES_EVENT,
};

/// Editor identity stamped on every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorInfo {
    pub name: String,
    pub version: String,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Number of lines as an editor counts them (a trailing newline opens one).
fn line_count(content: &str) -> u64 {
    content.split('\n').count() as u64
}

/// Change aggregator for the current day.
#[derive(Debug)]
pub struct ChangeTracker {
    store: LocalStore,
    snapshots: SnapshotStore,
    sync: SyncClient,
    notices: NoticeBus,
    editor: EditorInfo,
    date: NaiveDate,
    data: CodeChangesData,
}

impl ChangeTracker {
    /// Loads today's aggregate, rolling over when it does not exist yet.
    #[must_use]
    pub fn open(
        store: LocalStore,
        snapshots: SnapshotStore,
        sync: SyncClient,
        notices: NoticeBus,
        editor: EditorInfo,
    ) -> Self {
        let mut tracker = Self {
            store,
            snapshots,
            sync,
            notices,
            editor,
            date: NaiveDate::MIN,
            data: CodeChangesData::default(),
        };
        tracker.ensure_day(today());
        tracker
    }

    /// Switches to `date`'s aggregate.
    ///
    /// When the store has no aggregate for `date`, every temporary key
    /// (snapshots and older aggregates) is purged and an empty aggregate is
    /// written.
    pub fn ensure_day(&mut self, date: NaiveDate) {
        if self.date == date {
            return;
        }
        self.data = match self.store.code_changes(date) {
            Some(data) => {
                debug!(%date, records = data.code_changes.len(), "Loaded uncommitted changes");
                data
            }
            None => {
                let purged = self.store.delete_temp_keys();
                info!(%date, purged, "Starting new day of uncommitted changes");
                let data = CodeChangesData::empty(now_millis());
                if let Err(e) = self.store.set_code_changes(date, &data) {
                    warn!(error = %e, "Failed to write empty aggregate");
                }
                data
            }
        };
        self.date = date;
    }

    /// Today's aggregate.
    #[must_use]
    pub fn data(&self) -> &CodeChangesData {
        &self.data
    }

    #[must_use]
    pub fn summary(&self) -> CodeChangeSummary {
        self.data.code_change_summary
    }

    /// Returns the record for `path`, if any.
    #[must_use]
    pub fn record(&self, path: &Path) -> Option<&FileChangeRecord> {
        self.data.find(&path.to_string_lossy())
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    fn persist(&self) {
        if let Err(e) = self.store.set_code_changes(self.date, &self.data) {
            warn!(error = %e, "Failed to persist uncommitted changes");
        }
    }

    fn publish_summary(&self) {
        self.notices.publish(TrackerNotice::SummaryUpdated {
            summary: self.data.code_change_summary,
            total_lines_changed: self.data.total_lines_changed,
        });
    }

    /// Captures `content` as the baseline of a visible file that has none.
    ///
    /// The caller filters out ignored files. Returns true if a baseline was
    /// written.
    pub fn observe_visible(&mut self, path: &Path, content: &str) -> bool {
        self.ensure_day(today());
        self.snapshots.capture_if_absent(path, content)
    }

    /// Diffs `new_content` against the baseline of `path` and merges the
    /// result into today's record for that file.
    ///
    /// A missing baseline counts as empty.
    pub fn record_change(
        &mut self,
        path: &Path,
        new_content: &str,
        lang: &str,
        repo: &RepoContext,
    ) -> FileChangeRecord {
        self.ensure_day(today());

        let baseline = self.snapshots.get(path).unwrap_or_default();
        let lines = line_diff(&baseline, new_content);
        let chars = char_diff(&baseline, new_content);
        let now = now_millis();
        let file_path = path.to_string_lossy().into_owned();

        let fresh = FileChangeRecord {
            id: None,
            file_path: file_path.clone(),
            file_name: file_name(path),
            lang: lang.to_string(),
            lines_added: lines.lines_added,
            lines_deleted: lines.lines_deleted,
            blank_line: lines.blank_lines,
            characters_added: chars.characters_added,
            characters_deleted: chars.characters_deleted,
            character_count: chars.character_count,
            line_count: line_count(new_content),
            keystrokes: 1,
            editor_name: self.editor.name.clone(),
            editor_version: self.editor.version.clone(),
            event_type: UNCOMMITTED_CHANGES_EVENT.to_string(),
            start: Some(now),
            end: None,
            updated_date: now,
            ..FileChangeRecord::default()
        };

        let index = match self
            .data
            .code_changes
            .iter()
            .position(|c| c.file_path == file_path)
        {
            Some(index) => {
                let existing = &mut self.data.code_changes[index];
                *existing = FileChangeRecord {
                    id: existing.id.take(),
                    start: existing.start,
                    end: existing.end,
                    keystrokes: existing.keystrokes + 1,
                    ..fresh
                };
                index
            }
            None => {
                self.data.code_changes.push(fresh);
                self.data.code_changes.len() - 1
            }
        };
        let record = &mut self.data.code_changes[index];
        record.apply_repo_context(repo);
        let record = record.clone();

        self.data.recompute(now);
        self.persist();
        self.publish_summary();

        debug!(
            file = %record.file_path,
            lines_added = record.lines_added,
            lines_deleted = record.lines_deleted,
            keystrokes = record.keystrokes,
            "Recorded change"
        );
        record
    }

    /// Moves the record and baseline of `old` to `new`, keeping counters.
    pub fn on_rename(&mut self, old: &Path, new: &Path) {
        self.ensure_day(today());

        let old_path = old.to_string_lossy().into_owned();
        let new_path = new.to_string_lossy().into_owned();

        if self.data.find(&old_path).is_some() {
            // The renamed record replaces any record already at the target
            self.data.code_changes.retain(|c| c.file_path != new_path);
        }
        if let Some(record) = self.data.find_mut(&old_path) {
            record.file_path = new_path;
            record.file_name = file_name(new);
        }
        self.data.recompute(now_millis());
        self.persist();
        self.snapshots.rename(old, new);
        self.publish_summary();
    }

    /// Drops the record and baseline of a deleted file.
    ///
    /// If the record was already posted, the remote copy is deleted on a
    /// best-effort basis.
    pub async fn on_delete(&mut self, path: &Path) {
        self.ensure_day(today());

        let file_path = path.to_string_lossy();
        let Some(index) = self
            .data
            .code_changes
            .iter()
            .position(|c| c.file_path == file_path)
        else {
            return;
        };

        let removed = self.data.code_changes.remove(index);
        if let Some(id) = removed.id.as_deref() {
            self.sync.remove(id).await;
        }

        self.data.recompute(now_millis());
        self.persist();
        self.snapshots.remove(path);
        self.publish_summary();
        debug!(file = %removed.file_path, "Removed record of deleted file");
    }

    /// Posts the record of `path` and stores the result locally.
    ///
    /// Returns false when the file has no record or the post failed.
    pub async fn post_change(&mut self, path: &Path) -> bool {
        self.ensure_day(today());

        let Some(record) = self.data.find_mut(&path.to_string_lossy()) else {
            return false;
        };
        let posted = self.sync.post_change(record).await;
        self.persist();
        posted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::config::Config;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: LocalStore,
        notices: NoticeBus,
        tracker: ChangeTracker,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let notices = NoticeBus::new();
        let config = Config {
            api_url: "http://127.0.0.1:9".to_string(),
            data_dir: dir.path().to_path_buf(),
            workspaces: Vec::new(),
            session_timeout: Duration::from_secs(60),
            debounce: Duration::from_millis(50),
            request_timeout: Duration::from_secs(1),
            track_uncommitted: true,
            editor_name: "test-editor".to_string(),
            editor_version: "1.2.3".to_string(),
            login_port: 0,
        };
        // No token is stored, so every remote call fails locally
        let api = ApiClient::new(&config, store.clone(), notices.clone()).unwrap();
        let tracker = ChangeTracker::open(
            store.clone(),
            SnapshotStore::new(store.clone()),
            SyncClient::new(api, store.clone()),
            notices.clone(),
            EditorInfo {
                name: "test-editor".to_string(),
                version: "1.2.3".to_string(),
            },
        );
        Fixture {
            _dir: dir,
            store,
            notices,
            tracker,
        }
    }

    fn path(name: &str) -> PathBuf {
        PathBuf::from("/work/app/src").join(name)
    }

    #[test]
    fn test_first_change_creates_record() {
        let mut f = fixture();
        let p = path("main.rs");
        f.tracker.snapshots().set(&p, "a\nb\n");

        let record = f.tracker.record_change(&p, "a\nb\nc\n", "rust", &RepoContext::default());

        assert_eq!(record.lines_added, 1);
        assert_eq!(record.lines_deleted, 0);
        assert_eq!(record.blank_line, 0);
        assert_eq!(record.keystrokes, 1);
        assert_eq!(record.file_name, "main.rs");
        assert_eq!(record.lang, "rust");
        assert_eq!(record.line_count, 4);
        assert_eq!(record.editor_name, "test-editor");
        assert_eq!(record.event_type, UNCOMMITTED_CHANGES_EVENT);
        assert!(record.start.is_some());
    }

    #[test]
    fn test_counters_are_recomputed_not_accumulated() {
        let mut f = fixture();
        let p = path("lib.rs");
        f.tracker.snapshots().set(&p, "one\n");

        f.tracker.record_change(&p, "one\ntwo\n", "rust", &RepoContext::default());
        let first_start = f.tracker.record(&p).unwrap().start;
        f.tracker.record_change(&p, "one\ntwo\nthree\n", "rust", &RepoContext::default());
        let record = f.tracker.record_change(&p, "one\n", "rust", &RepoContext::default());

        assert_eq!(record.lines_added, 0);
        assert_eq!(record.lines_deleted, 0);
        assert_eq!(record.keystrokes, 3);
        assert_eq!(record.start, first_start);
        assert_eq!(f.tracker.data().code_changes.len(), 1);
    }

    #[test]
    fn test_missing_snapshot_is_empty_baseline() {
        let mut f = fixture();
        let record =
            f.tracker
                .record_change(&path("new.rs"), "x\ny\n", "rust", &RepoContext::default());
        assert_eq!(record.lines_added, 2);
        assert_eq!(record.characters_added, 4);
    }

    #[test]
    fn test_summary_is_sum_of_records() {
        let mut f = fixture();
        f.tracker.snapshots().set(&path("a.rs"), "keep\n");
        f.tracker
            .record_change(&path("a.rs"), "keep\n\nnew\n", "rust", &RepoContext::default());
        f.tracker
            .record_change(&path("b.rs"), "x\n", "rust", &RepoContext::default());

        let data = f.tracker.data();
        let summary = CodeChangeSummary::from_records(&data.code_changes);
        assert_eq!(data.code_change_summary, summary);
        assert_eq!(summary.lines_added, 3);
        assert_eq!(data.total_lines_changed, 3);
    }

    #[test]
    fn test_mutation_is_persisted() {
        let mut f = fixture();
        f.tracker
            .record_change(&path("a.rs"), "x\n", "rust", &RepoContext::default());

        let stored = f.store.code_changes(today()).unwrap();
        assert_eq!(stored, *f.tracker.data());
    }

    #[test]
    fn test_repo_context_applied() {
        let mut f = fixture();
        let repo = RepoContext {
            project_name: "app".to_string(),
            git_branch: "main".to_string(),
            identifier: "git@github.com:acme/app.git".to_string(),
            repo_name: "app".to_string(),
            ..RepoContext::default()
        };
        let record = f.tracker.record_change(&path("a.rs"), "x", "rust", &repo);
        assert_eq!(record.project_name, "app");
        assert_eq!(record.git_branch, "main");
        assert_eq!(record.repo_name, "app");
    }

    #[test]
    fn test_summary_published() {
        let mut f = fixture();
        let mut rx = f.notices.subscribe();

        f.tracker
            .record_change(&path("a.rs"), "x\n", "rust", &RepoContext::default());

        match rx.try_recv().unwrap() {
            TrackerNotice::SummaryUpdated {
                summary,
                total_lines_changed,
            } => {
                assert_eq!(summary.lines_added, 1);
                assert_eq!(total_lines_changed, 1);
            }
            other => panic!("unexpected notice {other:?}"),
        }
    }

    #[test]
    fn test_rename_preserves_counters_and_moves_snapshot() {
        let mut f = fixture();
        let old = path("old.rs");
        let new = path("new.rs");
        f.tracker.snapshots().set(&old, "base\n");
        let before = f
            .tracker
            .record_change(&old, "base\nmore\n", "rust", &RepoContext::default());

        f.tracker.on_rename(&old, &new);

        assert!(f.tracker.record(&old).is_none());
        assert!(f.tracker.snapshots().get(&old).is_none());
        let after = f.tracker.record(&new).unwrap();
        assert_eq!(after.lines_added, before.lines_added);
        assert_eq!(after.keystrokes, before.keystrokes);
        assert_eq!(after.file_name, "new.rs");
        assert_eq!(f.tracker.snapshots().get(&new).as_deref(), Some("base\n"));
    }

    #[test]
    fn test_rename_over_existing_record_publishes_summary() {
        let mut f = fixture();
        let old = path("a.rs");
        let new = path("b.rs");
        f.tracker
            .record_change(&old, "x\n", "rust", &RepoContext::default());
        f.tracker
            .record_change(&new, "y\nz\n", "rust", &RepoContext::default());
        let mut rx = f.notices.subscribe();

        f.tracker.on_rename(&old, &new);

        match rx.try_recv().unwrap() {
            TrackerNotice::SummaryUpdated {
                summary,
                total_lines_changed,
            } => {
                assert_eq!(summary.lines_added, 1);
                assert_eq!(total_lines_changed, 1);
            }
            other => panic!("unexpected notice {other:?}"),
        }
        assert_eq!(f.tracker.data().code_changes.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_edit_starts_fresh_record() {
        let mut f = fixture();
        let p = path("gone.rs");
        f.tracker.record_change(&p, "a\n", "rust", &RepoContext::default());
        f.tracker.record_change(&p, "a\nb\n", "rust", &RepoContext::default());

        f.tracker.on_delete(&p).await;
        assert!(f.tracker.record(&p).is_none());
        assert_eq!(f.tracker.data().total_lines_changed, 0);

        let record = f.tracker.record_change(&p, "z\n", "rust", &RepoContext::default());
        assert_eq!(record.keystrokes, 1);
        assert_eq!(record.lines_added, 1);
    }

    #[tokio::test]
    async fn test_failed_post_keeps_record_without_id() {
        let mut f = fixture();
        let p = path("a.rs");
        f.tracker.record_change(&p, "a\n", "rust", &RepoContext::default());

        assert!(!f.tracker.post_change(&p).await);

        let record = f.tracker.record(&p).unwrap();
        assert!(record.id.is_none());
        assert!(record.end.is_some());
        assert_eq!(f.store.code_changes(today()).unwrap().code_changes[0].end, record.end);
    }

    #[tokio::test]
    async fn test_post_without_record_is_noop() {
        let mut f = fixture();
        assert!(!f.tracker.post_change(&path("none.rs")).await);
    }

    #[test]
    fn test_day_rollover_purges_temp_keys() {
        let mut f = fixture();
        let p = path("a.rs");
        f.tracker.snapshots().set(&p, "old baseline");
        f.tracker.record_change(&p, "x\n", "rust", &RepoContext::default());

        let tomorrow = today().succ_opt().unwrap();
        f.tracker.ensure_day(tomorrow);

        assert!(f.tracker.data().code_changes.is_empty());
        assert!(f.tracker.snapshots().get(&p).is_none());
        assert!(f.store.code_changes(today()).is_none());
        assert!(f.store.code_changes(tomorrow).is_some());
    }

    #[test]
    fn test_reopen_loads_existing_day() {
        let mut f = fixture();
        f.tracker
            .record_change(&path("a.rs"), "x\n", "rust", &RepoContext::default());
        f.tracker.snapshots().set(&path("b.rs"), "kept");

        let reopened = ChangeTracker::open(
            f.store.clone(),
            SnapshotStore::new(f.store.clone()),
            f.tracker.sync.clone(),
            NoticeBus::new(),
            EditorInfo::default(),
        );

        assert_eq!(reopened.data().code_changes.len(), 1);
        assert_eq!(reopened.snapshots().get(&path("b.rs")).as_deref(), Some("kept"));
    }

    #[test]
    fn test_observe_visible_captures_once() {
        let mut f = fixture();
        let p = path("v.rs");
        assert!(f.tracker.observe_visible(&p, "first"));
        assert!(!f.tracker.observe_visible(&p, "second"));
        assert_eq!(f.tracker.snapshots().get(&p).as_deref(), Some("first"));
    }
}
