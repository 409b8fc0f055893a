//! Per-file baseline snapshots.
//!
//! A snapshot is the content of a file as it was when the tracker first saw
//! it today. Every change is diffed against it, so counters always describe
//! the total delta since the baseline rather than a running sum.

use std::path::Path;

use tracing::{debug, warn};

use crate::store::{LocalStore, TEMP_DATA_KEY};

/// Snapshot store backed by the local key-value store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    store: LocalStore,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    fn key(path: &Path) -> String {
        format!("{TEMP_DATA_KEY}{}", path.display())
    }

    /// Returns the baseline for `path`, if one was captured.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<String> {
        self.store.get(&Self::key(path))
    }

    /// Returns true if a baseline exists for `path`.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Stores `content` as the baseline for `path`, replacing any existing one.
    pub fn set(&self, path: &Path, content: &str) {
        if let Err(e) = self.store.set(&Self::key(path), content) {
            warn!(path = %path.display(), error = %e, "Failed to write snapshot");
        }
    }

    /// Captures `content` as the baseline unless one already exists.
    ///
    /// Returns true if a new baseline was written.
    pub fn capture_if_absent(&self, path: &Path, content: &str) -> bool {
        if self.contains(path) {
            return false;
        }
        debug!(path = %path.display(), "Capturing baseline snapshot");
        self.set(path, content);
        true
    }

    /// Moves the baseline of `old` to `new`. No-op when `old` has none.
    pub fn rename(&self, old: &Path, new: &Path) {
        if let Some(content) = self.get(old) {
            self.set(new, &content);
            self.remove(old);
        }
    }

    /// Removes the baseline for `path`.
    pub fn remove(&self, path: &Path) {
        if let Err(e) = self.store.delete(&Self::key(path)) {
            warn!(path = %path.display(), error = %e, "Failed to remove snapshot");
        }
    }
}
