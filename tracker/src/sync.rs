//! Reconciliation between the local cache and the DevBoost API.
//!
//! The local store is authoritative for uncommitted changes; the service is
//! authoritative for time totals. Every read falls back to the cache when the
//! service cannot be reached, so callers never see a network error from the
//! read paths.

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::store::{today, LocalStore};
use crate::types::{
    now_millis, CreatedId, FileChangeRecord, TimeTracking, User, UNCOMMITTED_CHANGES_EVENT,
};

const CODETIME_PATH: &str = "/users/current/codetime";
const CODETIME_TODAY_PATH: &str = "/users/current/codetime/today";
const TIMETRACKING_PATH: &str = "/users/current/timetracking";
const TIMETRACKING_TODAY_PATH: &str = "/users/current/timetracking/today";
const TIMETRACKING_REPORT_PATH: &str = "/users/current/timetracking/report";
const USER_PATH: &str = "/user";

fn log_fallback(operation: &str, error: &ApiError) {
    if error.is_transient() {
        warn!(operation, error = %error, "Remote unavailable, using local cache");
    } else {
        debug!(operation, error = %error, "Remote request failed, using local cache");
    }
}

/// Sync layer over an [`ApiClient`] and the [`LocalStore`].
#[derive(Debug, Clone)]
pub struct SyncClient {
    api: ApiClient,
    store: LocalStore,
}

impl SyncClient {
    #[must_use]
    pub fn new(api: ApiClient, store: LocalStore) -> Self {
        Self { api, store }
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Posts one change record.
    ///
    /// Stamps `end`, then stores the id the service returns. A failed post
    /// leaves `id` unset. The caller persists the record either way.
    ///
    /// Returns true if the post succeeded.
    pub async fn post_change(&self, record: &mut FileChangeRecord) -> bool {
        record.end = Some(now_millis());
        match self
            .api
            .post_json::<_, CreatedId>(CODETIME_PATH, &*record)
            .await
        {
            Ok(created) => {
                record.id = created.map(|c| c.id);
                info!(
                    file = %record.file_path,
                    id = ?record.id,
                    "Posted uncommitted changes"
                );
                true
            }
            Err(e) => {
                record.id = None;
                log_fallback("post_change", &e);
                false
            }
        }
    }

    /// Deletes a remote change record. Errors are logged and swallowed.
    pub async fn remove(&self, id: &str) {
        match self.api.delete(&format!("{CODETIME_PATH}/{id}")).await {
            Ok(()) => debug!(id, "Removed remote change record"),
            Err(e) => debug!(id, error = %e, "Failed to remove remote change record"),
        }
    }

    /// Today's time totals.
    ///
    /// A successful response (a `null` body counts as zero totals) refreshes
    /// the cache. Any failure returns the cached totals, or zero.
    pub async fn time_tracking_today(&self) -> TimeTracking {
        let date = today();
        match self
            .api
            .get_json::<TimeTracking>(TIMETRACKING_TODAY_PATH, &[])
            .await
        {
            Ok(totals) => {
                let totals = totals.unwrap_or_default();
                if let Err(e) = self.store.set_time_tracking(date, &totals) {
                    warn!(error = %e, "Failed to cache time totals");
                }
                totals
            }
            Err(e) => {
                log_fallback("time_tracking_today", &e);
                self.store.time_tracking(date).unwrap_or_default()
            }
        }
    }

    /// Today's uncommitted change records, falling back to the cached day.
    pub async fn uncommitted_changes_today(&self) -> Vec<FileChangeRecord> {
        match self
            .api
            .get_json::<Vec<FileChangeRecord>>(
                CODETIME_TODAY_PATH,
                &[("eventType", UNCOMMITTED_CHANGES_EVENT)],
            )
            .await
        {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                log_fallback("uncommitted_changes_today", &e);
                self.store
                    .code_changes(today())
                    .map(|data| data.code_changes)
                    .unwrap_or_default()
            }
        }
    }

    /// Posts a finalized session.
    ///
    /// # Errors
    ///
    /// Returns the API error; the payload is not retried or cached.
    pub async fn post_session(&self, payload: &TimeTracking) -> Result<(), ApiError> {
        self.api
            .post_json::<_, serde_json::Value>(TIMETRACKING_PATH, payload)
            .await?;
        debug!(
            kpm = payload.kpm,
            vscode_time = payload.vscode_time,
            code_time = payload.code_time,
            repos = payload.repos.len(),
            "Posted session"
        );
        Ok(())
    }

    /// Fetches and caches the user profile.
    ///
    /// On failure the cached profile is cleared and `None` returned.
    pub async fn fetch_user(&self) -> Option<User> {
        let user = match self.api.get_json::<User>(USER_PATH, &[]).await {
            Ok(user) => user,
            Err(e) => {
                debug!(error = %e, "Failed to fetch user profile");
                None
            }
        };
        if let Err(e) = self.store.set_user_info(user.as_ref()) {
            warn!(error = %e, "Failed to update cached user profile");
        }
        user
    }

    /// Fetches the time tracking report as HTML.
    ///
    /// # Errors
    ///
    /// Returns the API error.
    pub async fn report_html(&self) -> Result<String, ApiError> {
        self.api.get_text(TIMETRACKING_REPORT_PATH).await
    }
}
