//! DevBoost Tracker - editor activity tracking.
//!
//! Passively measures developer activity from editor events: active time in
//! fixed one-minute sessions, keystrokes per repository, and uncommitted line
//! deltas per file against a daily baseline. Everything is cached locally per
//! day and mirrored to the DevBoost API, falling back to the cache whenever the
//! service is unreachable.
//!
//! # Modules
//!
//! - [`events`]: Typed editor events (input) and tracker notices (output)
//! - [`tracker`]: Event loop routing events to the components below
//! - [`session`]: Fixed-window activity sessions
//! - [`aggregator`]: Per-day uncommitted change records
//! - [`diff`]: Line and character diff counts
//! - [`snapshot`]: Per-file baseline snapshots
//! - [`ignore`]: Workspace `.gitignore` matching
//! - [`repo`]: Workspace and git repository context
//! - [`store`]: Local JSON key-value cache
//! - [`api`]: DevBoost HTTP client
//! - [`sync`]: Remote reads and writes with local fallback
//! - [`watcher`]: Filesystem watcher for standalone mode
//! - [`login`]: GitHub login callback listener
//! - [`status`]: Status-line formatting
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`utils`]: Shared utilities (debouncing)

pub mod aggregator;
pub mod api;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod ignore;
pub mod login;
pub mod repo;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod types;
pub mod utils;
pub mod watcher;

pub use aggregator::{ChangeTracker, EditorInfo};
pub use api::{ApiClient, ApiError};
pub use config::{Config, ConfigError};
pub use error::{Result, TrackerError};
pub use events::{Document, EditorEvent, NoticeBus, RenamedFile, TrackerNotice};
pub use ignore::IgnoreFilter;
pub use login::{LoginError, LoginListener};
pub use repo::RepoResolver;
pub use session::{SessionState, SessionTracker};
pub use snapshot::SnapshotStore;
pub use status::StatusLines;
pub use store::{LocalStore, StoreError};
pub use sync::SyncClient;
pub use tracker::Tracker;
pub use types::{
    AuthToken, CodeChangeSummary, CodeChangesData, FileChangeRecord, TimeTracking, TokenType, User,
};
pub use utils::{Debouncer, DebouncerError, DEFAULT_DEBOUNCE_MS};
pub use watcher::{WatcherError, WorkspaceWatcher};
