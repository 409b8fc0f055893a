//! Activity session state machine.
//!
//! ```text
//!            qualifying event
//!   Idle ───────────────────────▶ Active ──┐ further events: counters only,
//!    ▲                              │  ◀───┘ deadline unchanged
//!    └──── deadline / focus lost ───┘ (finalize → TimeTracking payload)
//! ```
//!
//! A session is a fixed window: it always ends `timeout` after the event that
//! started it, regardless of later activity. Activity after that starts a new
//! session.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::types::{RepoTimeTracking, TimeTracking};

/// Default session window in seconds.
pub const DEFAULT_SESSION_SECS: u64 = 60;

/// Current state of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

/// The in-flight session.
#[derive(Debug, Clone)]
struct ActivitySession {
    started_at: Instant,
    deadline: Instant,
    keystrokes: u64,
    repo_keystrokes: HashMap<String, u64>,
    /// Repository identifiers in first-touch order.
    repos: Vec<String>,
}

impl ActivitySession {
    fn touch(&mut self, repo: &str) {
        if !self.repos.iter().any(|r| r == repo) {
            self.repos.push(repo.to_string());
        }
    }
}

/// Tracks at most one activity session.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    timeout: Duration,
    session: Option<ActivitySession>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_SECS))
    }
}

impl SessionTracker {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            session: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    /// When the active session ends, if there is one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.deadline)
    }

    /// Keystrokes counted in the active session.
    #[must_use]
    pub fn keystrokes(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.keystrokes)
    }

    fn active(&mut self) -> &mut ActivitySession {
        let timeout = self.timeout;
        self.session.get_or_insert_with(|| {
            let now = Instant::now();
            debug!(timeout_secs = timeout.as_secs(), "Activity session started");
            ActivitySession {
                started_at: now,
                deadline: now + timeout,
                keystrokes: 0,
                repo_keystrokes: HashMap::new(),
                repos: Vec::new(),
            }
        })
    }

    /// Records a qualifying event, starting a session when idle.
    ///
    /// `repo` is the repository identifier of the affected file, if known.
    pub fn record_activity(&mut self, repo: Option<&str>) {
        let session = self.active();
        if let Some(repo) = repo {
            session.touch(repo);
        }
    }

    /// Records a document change: counts a keystroke for the session and for
    /// the file's repository.
    pub fn record_keystroke(&mut self, repo: Option<&str>) {
        let session = self.active();
        session.keystrokes += 1;
        if let Some(repo) = repo {
            *session.repo_keystrokes.entry(repo.to_string()).or_insert(0) += 1;
            session.touch(repo);
        }
    }

    /// Returns true if the active session's window has passed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.session.as_ref().is_some_and(|s| now >= s.deadline)
    }

    /// Ends the active session and returns its payload.
    ///
    /// Returns `None` when idle.
    pub fn finalize(&mut self) -> Option<TimeTracking> {
        let session = self.session.take()?;
        let elapsed = Instant::now()
            .saturating_duration_since(session.started_at)
            .as_millis() as u64;
        let coded = |keystrokes: u64| if keystrokes > 0 { elapsed } else { 0 };

        let repos = session
            .repos
            .iter()
            .map(|repo| {
                let kpm = session.repo_keystrokes.get(repo).copied().unwrap_or(0);
                BTreeMap::from([(
                    repo.clone(),
                    RepoTimeTracking {
                        vscode_time: elapsed,
                        code_time: coded(kpm),
                        kpm,
                    },
                )])
            })
            .collect();

        debug!(
            elapsed_ms = elapsed,
            keystrokes = session.keystrokes,
            repos = session.repos.len(),
            "Activity session finalized"
        );

        Some(TimeTracking {
            id: None,
            kpm: session.keystrokes,
            vscode_time: elapsed,
            code_time: coded(session.keystrokes),
            repos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const REPO: &str = "git@github.com:acme/app.git";
    const OTHER: &str = "https://github.com/acme/lib.git";

    #[tokio::test(start_paused = true)]
    async fn test_idle_to_active_arms_deadline() {
        let mut tracker = SessionTracker::default();
        assert_eq!(tracker.state(), SessionState::Idle);
        assert!(tracker.deadline().is_none());

        let start = Instant::now();
        tracker.record_activity(None);

        assert_eq!(tracker.state(), SessionState::Active);
        assert_eq!(tracker.deadline(), Some(start + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_not_extended_by_activity() {
        let mut tracker = SessionTracker::default();
        let start = Instant::now();
        tracker.record_activity(Some(REPO));

        for _ in 0..5 {
            advance(Duration::from_secs(10)).await;
            tracker.record_keystroke(Some(REPO));
        }

        assert_eq!(tracker.deadline(), Some(start + Duration::from_secs(60)));
        assert!(!tracker.is_expired(Instant::now()));

        advance(Duration::from_secs(10)).await;
        assert!(tracker.is_expired(Instant::now()));

        let payload = tracker.finalize().unwrap();
        assert_eq!(payload.vscode_time, 60_000);
        assert_eq!(payload.code_time, 60_000);
        assert_eq!(payload.kpm, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_payload_per_repo() {
        let mut tracker = SessionTracker::new(Duration::from_secs(60));
        tracker.record_activity(Some(OTHER));
        tracker.record_keystroke(Some(REPO));
        tracker.record_keystroke(Some(REPO));
        tracker.record_activity(Some(REPO));

        advance(Duration::from_secs(20)).await;
        let payload = tracker.finalize().unwrap();

        assert_eq!(payload.id, None);
        assert_eq!(payload.kpm, 2);
        assert_eq!(payload.vscode_time, 20_000);
        assert_eq!(payload.code_time, 20_000);
        assert_eq!(payload.repos.len(), 2);

        let other = payload.repos[0][OTHER];
        assert_eq!(other.vscode_time, 20_000);
        assert_eq!(other.code_time, 0);
        assert_eq!(other.kpm, 0);

        let repo = payload.repos[1][REPO];
        assert_eq!(repo.code_time, 20_000);
        assert_eq!(repo.kpm, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_keystrokes_means_no_code_time() {
        let mut tracker = SessionTracker::default();
        tracker.record_activity(None);
        advance(Duration::from_secs(5)).await;

        let payload = tracker.finalize().unwrap();
        assert_eq!(payload.vscode_time, 5_000);
        assert_eq!(payload.code_time, 0);
        assert!(payload.repos.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_resets_counters() {
        let mut tracker = SessionTracker::default();
        tracker.record_keystroke(Some(REPO));
        tracker.finalize().unwrap();

        assert_eq!(tracker.state(), SessionState::Idle);
        assert_eq!(tracker.keystrokes(), 0);
        assert!(tracker.finalize().is_none(), "finalizing while idle is a no-op");

        tracker.record_activity(None);
        let payload = tracker.finalize().unwrap();
        assert_eq!(payload.kpm, 0);
        assert!(payload.repos.is_empty());
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = TimeTracking {
            id: None,
            kpm: 3,
            vscode_time: 60_000,
            code_time: 60_000,
            repos: vec![BTreeMap::from([(
                REPO.to_string(),
                RepoTimeTracking {
                    vscode_time: 60_000,
                    code_time: 60_000,
                    kpm: 3,
                },
            )])],
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": null,
                "KPM": 3,
                "vscodeTime": 60000,
                "codeTime": 60000,
                "repos": [{ REPO: { "vscodeTime": 60000, "codeTime": 60000, "kpm": 3 } }]
            })
        );
    }
}
