//! Record types shared by the local cache and the remote API.
//!
//! All types serialize to the camelCase JSON the DevBoost service expects, so
//! the same value can be written to the local store and posted unchanged.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Event type attached to every uncommitted change record.
pub const UNCOMMITTED_CHANGES_EVENT: &str = "UNCOMMITTED_CHANGES";

/// Returns the current time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Repository and workspace context of a tracked file.
///
/// Every field is empty when the file is not inside a git workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoContext {
    pub project_name: String,
    pub project_directory: String,
    pub git_branch: String,
    /// Remote origin URL.
    pub identifier: String,
    pub author_email: String,
    pub author_name: String,
    pub git_tag: String,
    pub repo_name: String,
}

/// Uncommitted change counters for one file within one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeRecord {
    /// Assigned by the remote store once a post succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub lang: String,

    #[serde(default)]
    pub lines_added: u64,
    #[serde(default)]
    pub lines_deleted: u64,
    #[serde(default)]
    pub blank_line: u64,
    #[serde(default)]
    pub characters_added: u64,
    #[serde(default)]
    pub characters_deleted: u64,
    #[serde(default)]
    pub character_count: u64,
    #[serde(default)]
    pub line_count: u64,
    #[serde(default)]
    pub keystrokes: u64,

    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project_directory: String,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_tag: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,

    #[serde(default)]
    pub editor_name: String,
    #[serde(default)]
    pub editor_version: String,

    #[serde(default = "default_event_type")]
    pub event_type: String,

    /// Epoch milliseconds of the first tracked edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Epoch milliseconds of the last post to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    /// Epoch milliseconds of the last recomputation.
    #[serde(default)]
    pub updated_date: i64,
}

fn default_event_type() -> String {
    UNCOMMITTED_CHANGES_EVENT.to_string()
}

impl FileChangeRecord {
    /// Copies repository context into the record.
    pub fn apply_repo_context(&mut self, repo: &RepoContext) {
        self.project_name.clone_from(&repo.project_name);
        self.project_directory.clone_from(&repo.project_directory);
        self.repo_name.clone_from(&repo.repo_name);
        self.git_branch.clone_from(&repo.git_branch);
        self.git_tag.clone_from(&repo.git_tag);
        self.identifier.clone_from(&repo.identifier);
        self.author_name.clone_from(&repo.author_name);
        self.author_email.clone_from(&repo.author_email);
    }
}

/// Rollup of line counters across all records of a day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChangeSummary {
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub blank_line: u64,
}

impl CodeChangeSummary {
    /// Sums the line counters of `records`.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FileChangeRecord>) -> Self {
        records.into_iter().fold(Self::default(), |acc, record| Self {
            lines_added: acc.lines_added + record.lines_added,
            lines_deleted: acc.lines_deleted + record.lines_deleted,
            blank_line: acc.blank_line + record.blank_line,
        })
    }

    /// Lines added plus lines deleted.
    #[must_use]
    pub fn total_lines_changed(&self) -> u64 {
        self.lines_added + self.lines_deleted
    }
}

/// Per-day aggregate of uncommitted changes.
///
/// `code_change_summary` and `total_lines_changed` are derived from
/// `code_changes`; mutate the records and call [`CodeChangesData::recompute`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChangesData {
    pub total_lines_changed: u64,
    pub code_change_summary: CodeChangeSummary,
    pub last_modified_timestamp: i64,
    pub code_changes: Vec<FileChangeRecord>,
}

impl CodeChangesData {
    /// Creates an empty aggregate stamped with `now`.
    #[must_use]
    pub fn empty(now: i64) -> Self {
        Self {
            last_modified_timestamp: now,
            ..Self::default()
        }
    }

    /// Returns the record for `file_path`, if any.
    #[must_use]
    pub fn find(&self, file_path: &str) -> Option<&FileChangeRecord> {
        self.code_changes.iter().find(|c| c.file_path == file_path)
    }

    /// Returns a mutable reference to the record for `file_path`, if any.
    pub fn find_mut(&mut self, file_path: &str) -> Option<&mut FileChangeRecord> {
        self.code_changes
            .iter_mut()
            .find(|c| c.file_path == file_path)
    }

    /// Recomputes the derived summary fields and stamps the modification time.
    pub fn recompute(&mut self, now: i64) {
        self.code_change_summary = CodeChangeSummary::from_records(&self.code_changes);
        self.total_lines_changed = self.code_change_summary.total_lines_changed();
        self.last_modified_timestamp = now;
    }
}

/// Time totals for one repository within a session or a day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoTimeTracking {
    pub vscode_time: u64,
    pub code_time: u64,
    pub kpm: u64,
}

/// A finalized activity session, or the day's rolled-up totals.
///
/// Times are milliseconds. `repos` holds one single-entry map per repository,
/// keyed by the repository identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTracking {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "KPM", default)]
    pub kpm: u64,
    #[serde(rename = "vscodeTime", default)]
    pub vscode_time: u64,
    #[serde(rename = "codeTime", default)]
    pub code_time: u64,
    #[serde(default)]
    pub repos: Vec<BTreeMap<String, RepoTimeTracking>>,
}

/// Identity provider of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Pwd,
    Github,
    Google,
    Azure,
}

impl TokenType {
    /// Numeric code used on the wire and in the `Token-Type` header.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Pwd => 0,
            Self::Github => 1,
            Self::Google => 2,
            Self::Azure => 3,
        }
    }

    /// Parses a numeric code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Pwd),
            1 => Some(Self::Github),
            2 => Some(Self::Google),
            3 => Some(Self::Azure),
            _ => None,
        }
    }
}

impl Serialize for TokenType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TokenType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown token type {code}")))
    }
}

/// Stored authentication token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub token: String,
}

/// The parts of the remote user profile the tracker uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub github_id: Option<String>,
    #[serde(default)]
    pub org_id: Option<i64>,
}

/// Identifier returned by the service when a record is stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedId {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
}

/// Accepts both numeric and string ids.
fn id_as_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}
