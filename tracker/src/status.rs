//! Status-line text for presentation subscribers.
//!
//! [`StatusLines`] folds [`TrackerNotice`]s into the two lines an editor shows:
//!
//! ```text
//! L+: 12 | L-: 3 | LB: 1
//! VS: 01:05m | Code: 42m
//! ```

use crate::events::TrackerNotice;
use crate::types::{CodeChangeSummary, TimeTracking};

const MS_PER_MINUTE: u64 = 60 * 1000;

fn pad(value: u64) -> String {
    format!("{value:02}")
}

/// Formats a millisecond duration as `HH:MMm`, or `MMm` below one hour.
///
/// ```
/// use devboost_tracker::status::format_duration;
///
/// assert_eq!(format_duration(0), "00m");
/// assert_eq!(format_duration(5 * 60_000), "05m");
/// assert_eq!(format_duration(42 * 60_000), "42m");
/// assert_eq!(format_duration(65 * 60_000), "01:05m");
/// ```
#[must_use]
pub fn format_duration(millis: u64) -> String {
    let total_minutes = millis / MS_PER_MINUTE;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 0 {
        format!("{}:{}m", pad(hours), pad(minutes))
    } else {
        format!("{}m", pad(minutes))
    }
}

/// `L+: <added> | L-: <deleted> | LB: <blank>`
#[must_use]
pub fn changes_line(summary: &CodeChangeSummary) -> String {
    format!(
        "L+: {} | L-: {} | LB: {}",
        summary.lines_added, summary.lines_deleted, summary.blank_line
    )
}

/// `VS: <editor time> | Code: <coding time>`
#[must_use]
pub fn time_line(vscode_time: u64, code_time: u64) -> String {
    format!(
        "VS: {} | Code: {}",
        format_duration(vscode_time),
        format_duration(code_time)
    )
}

/// Current state of both status lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusLines {
    pub summary: CodeChangeSummary,
    pub vscode_time: u64,
    pub code_time: u64,
}

impl StatusLines {
    /// Seeds the lines from an aggregate summary and daily totals.
    #[must_use]
    pub fn new(summary: CodeChangeSummary, totals: &TimeTracking) -> Self {
        Self {
            summary,
            vscode_time: totals.vscode_time,
            code_time: totals.code_time,
        }
    }

    /// Applies a notice. Returns true if a line changed.
    pub fn apply(&mut self, notice: &TrackerNotice) -> bool {
        let before = *self;
        match notice {
            TrackerNotice::SummaryUpdated { summary, .. } => self.summary = *summary,
            TrackerNotice::TimeTotalsUpdated {
                code_time,
                vscode_time,
            } => {
                self.code_time = *code_time;
                self.vscode_time = *vscode_time;
            }
            TrackerNotice::AuthRequired { .. } => {}
        }
        *self != before
    }

    #[must_use]
    pub fn changes(&self) -> String {
        changes_line(&self.summary)
    }

    #[must_use]
    pub fn time(&self) -> String {
        time_line(self.vscode_time, self.code_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_boundaries() {
        assert_eq!(format_duration(59_999), "00m");
        assert_eq!(format_duration(9 * MS_PER_MINUTE), "09m");
        assert_eq!(format_duration(10 * MS_PER_MINUTE), "10m");
        assert_eq!(format_duration(60 * MS_PER_MINUTE), "01:00m");
        assert_eq!(format_duration(125 * MS_PER_MINUTE), "02:05m");
        assert_eq!(format_duration(12 * 60 * MS_PER_MINUTE), "12:00m");
    }

    #[test]
    fn test_lines() {
        let summary = CodeChangeSummary {
            lines_added: 12,
            lines_deleted: 3,
            blank_line: 1,
        };
        assert_eq!(changes_line(&summary), "L+: 12 | L-: 3 | LB: 1");
        assert_eq!(
            time_line(65 * MS_PER_MINUTE, 42 * MS_PER_MINUTE),
            "VS: 01:05m | Code: 42m"
        );
    }

    #[test]
    fn test_apply_notices() {
        let mut lines = StatusLines::default();
        assert_eq!(lines.changes(), "L+: 0 | L-: 0 | LB: 0");
        assert_eq!(lines.time(), "VS: 00m | Code: 00m");

        let summary = CodeChangeSummary {
            lines_added: 2,
            lines_deleted: 0,
            blank_line: 0,
        };
        assert!(lines.apply(&TrackerNotice::SummaryUpdated {
            summary,
            total_lines_changed: 2,
        }));
        assert_eq!(lines.changes(), "L+: 2 | L-: 0 | LB: 0");

        assert!(lines.apply(&TrackerNotice::TimeTotalsUpdated {
            code_time: 60_000,
            vscode_time: 120_000,
        }));
        assert_eq!(lines.time(), "VS: 02m | Code: 01m");

        assert!(!lines.apply(&TrackerNotice::AuthRequired {
            message: "login".to_string(),
        }));
    }
}
