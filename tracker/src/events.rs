//! Typed editor events and tracker notices.
//!
//! [`EditorEvent`] is the input side: one JSON object per line on stdin,
//! internally tagged by `"event"`:
//!
//! ```json
//! {"event":"documentChanged","path":"/work/app/src/main.rs","lang":"rust","content":"fn main() {}\n"}
//! {"event":"windowFocus","focused":false}
//! ```
//!
//! [`TrackerNotice`] is the output side, fanned out to presentation
//! subscribers through a [`NoticeBus`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::types::CodeChangeSummary;

/// Default capacity of the notice channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

fn default_scheme() -> String {
    "file".to_string()
}

/// A text document as reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Absolute file system path.
    pub path: PathBuf,
    /// URI scheme of the document (`file`, `untitled`, `git`, ...).
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Language identifier.
    #[serde(default)]
    pub lang: String,
    /// Full current text, when the event carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Document {
    /// Creates a `file` document with content.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scheme: default_scheme(),
            lang: String::new(),
            content: Some(content.into()),
        }
    }

    /// Returns true if events on this document should be tracked at all.
    ///
    /// Only real files and untitled buffers qualify; Live Share temp
    /// workspaces are skipped.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        if self.path.as_os_str().is_empty() {
            return false;
        }
        if self.scheme != "file" && self.scheme != "untitled" {
            return false;
        }
        !is_liveshare_tmp(&self.path.to_string_lossy())
    }
}

/// Matches `*.code-workspace*vsliveshare*tmp-*`.
fn is_liveshare_tmp(path: &str) -> bool {
    let Some(pos) = path.find(".code-workspace") else {
        return false;
    };
    let rest = &path[pos..];
    rest.find("vsliveshare")
        .is_some_and(|pos| rest[pos..].contains("tmp-"))
}

/// A renamed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedFile {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

/// An event reported by the editor (or synthesized by the file watcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EditorEvent {
    DocumentOpened(Document),
    DocumentChanged(Document),
    DocumentSaved(Document),
    DocumentClosed(Document),
    FilesRenamed { files: Vec<RenamedFile> },
    FilesDeleted { paths: Vec<PathBuf> },
    /// The set of documents currently visible in editors.
    VisibleEditors { documents: Vec<Document> },
    TerminalInteracted,
    WindowFocus { focused: bool },
}

impl EditorEvent {
    /// Short name used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DocumentOpened(_) => "documentOpened",
            Self::DocumentChanged(_) => "documentChanged",
            Self::DocumentSaved(_) => "documentSaved",
            Self::DocumentClosed(_) => "documentClosed",
            Self::FilesRenamed { .. } => "filesRenamed",
            Self::FilesDeleted { .. } => "filesDeleted",
            Self::VisibleEditors { .. } => "visibleEditors",
            Self::TerminalInteracted => "terminalInteracted",
            Self::WindowFocus { .. } => "windowFocus",
        }
    }
}

/// A notification for presentation subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "camelCase")]
pub enum TrackerNotice {
    /// The day's uncommitted change summary changed.
    #[serde(rename_all = "camelCase")]
    SummaryUpdated {
        summary: CodeChangeSummary,
        total_lines_changed: u64,
    },
    /// Fresh daily time totals after a session was posted (milliseconds).
    #[serde(rename_all = "camelCase")]
    TimeTotalsUpdated { code_time: u64, vscode_time: u64 },
    /// The service rejected the stored token.
    AuthRequired { message: String },
}

/// Fan-out channel for [`TrackerNotice`]s.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    sender: Sender<TrackerNotice>,
}

impl NoticeBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created notice bus");
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> Receiver<TrackerNotice> {
        self.sender.subscribe()
    }

    /// Publishes a notice. Returns the number of subscribers that received it.
    pub fn publish(&self, notice: TrackerNotice) -> usize {
        match self.sender.send(notice) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for notice");
                0
            }
        }
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_changed() {
        let line = r#"{"event":"documentChanged","path":"/w/a.rs","lang":"rust","content":"x\n"}"#;
        let event: EditorEvent = serde_json::from_str(line).unwrap();
        match event {
            EditorEvent::DocumentChanged(doc) => {
                assert_eq!(doc.path, PathBuf::from("/w/a.rs"));
                assert_eq!(doc.scheme, "file");
                assert_eq!(doc.lang, "rust");
                assert_eq!(doc.content.as_deref(), Some("x\n"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_parse_rename_and_focus() {
        let rename: EditorEvent = serde_json::from_str(
            r#"{"event":"filesRenamed","files":[{"oldPath":"/w/a.rs","newPath":"/w/b.rs"}]}"#,
        )
        .unwrap();
        assert_eq!(
            rename,
            EditorEvent::FilesRenamed {
                files: vec![RenamedFile {
                    old_path: "/w/a.rs".into(),
                    new_path: "/w/b.rs".into(),
                }],
            }
        );

        let focus: EditorEvent =
            serde_json::from_str(r#"{"event":"windowFocus","focused":false}"#).unwrap();
        assert_eq!(focus, EditorEvent::WindowFocus { focused: false });

        let terminal: EditorEvent =
            serde_json::from_str(r#"{"event":"terminalInteracted"}"#).unwrap();
        assert_eq!(terminal.name(), "terminalInteracted");
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<EditorEvent>(r#"{"event":"explode"}"#).is_err());
    }

    #[test]
    fn test_trackable_schemes() {
        let mut doc = Document::file("/w/a.rs", "");
        assert!(doc.is_trackable());

        doc.scheme = "untitled".to_string();
        assert!(doc.is_trackable());

        doc.scheme = "git".to_string();
        assert!(!doc.is_trackable());
    }

    #[test]
    fn test_liveshare_tmp_not_trackable() {
        let doc = Document::file("/tmp/x.code-workspace/vsliveshare/tmp-123/a.rs", "");
        assert!(!doc.is_trackable());
    }

    #[test]
    fn test_notice_serialization() {
        let notice = TrackerNotice::TimeTotalsUpdated {
            code_time: 60_000,
            vscode_time: 120_000,
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["notice"], "timeTotalsUpdated");
        assert_eq!(json["codeTime"], 60_000);
        assert_eq!(json["vscodeTime"], 120_000);
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = NoticeBus::new();
        let mut rx = bus.subscribe();

        let delivered = bus.publish(TrackerNotice::AuthRequired {
            message: "login".to_string(),
        });
        assert_eq!(delivered, 1);
        assert!(matches!(rx.recv().await.unwrap(), TrackerNotice::AuthRequired { .. }));
    }

    #[test]
    fn test_bus_without_subscribers() {
        let bus = NoticeBus::new();
        assert_eq!(
            bus.publish(TrackerNotice::AuthRequired {
                message: String::new()
            }),
            0
        );
    }
}
