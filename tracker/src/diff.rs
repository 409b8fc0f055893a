//! Diff engine adapter over [`similar`].
//!
//! The tracker never stores diffs, only counts derived from them:
//!
//! - `lines_added` / `lines_deleted`: number of lines in inserted / deleted
//!   segments of a line diff (a replaced block counts as both)
//! - `blank_lines`: for every inserted or deleted segment whose text is only
//!   whitespace, the number of newlines in that segment
//! - `characters_added` / `characters_deleted`: inserted / deleted characters
//!   of a character diff
//!
//! # Example
//!
//! ```
//! use devboost_tracker::diff::line_diff;
//!
//! let diff = line_diff("a\nb\n", "a\nb\nc\n");
//! assert_eq!(diff.lines_added, 1);
//! assert_eq!(diff.lines_deleted, 0);
//! assert_eq!(diff.blank_lines, 0);
//! ```

use std::time::Duration;

use similar::{Algorithm, DiffOp, TextDiff};

/// Upper bound on time spent in one diff; past it the result is approximate.
const DIFF_TIMEOUT: Duration = Duration::from_secs(1);

/// Line-level counts between a baseline and the current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineDiff {
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub blank_lines: u64,
}

impl LineDiff {
    /// Returns the total number of changed lines (added + deleted).
    #[must_use]
    pub fn total_changes(&self) -> u64 {
        self.lines_added + self.lines_deleted
    }

    /// Returns true if there are no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines_added == 0 && self.lines_deleted == 0
    }
}

/// Character-level counts between a baseline and the current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharDiff {
    pub characters_added: u64,
    pub characters_deleted: u64,
    /// Length of the current content in characters.
    pub character_count: u64,
}

/// Counts lines added, deleted and blank between `old` and `new`.
#[must_use]
pub fn line_diff(old: &str, new: &str) -> LineDiff {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(DIFF_TIMEOUT)
        .diff_lines(old, new);

    let old_lines = diff.old_slices();
    let new_lines = diff.new_slices();
    let mut result = LineDiff::default();

    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                count_segment(
                    &new_lines[new_index..new_index + new_len],
                    &mut result.lines_added,
                    &mut result.blank_lines,
                );
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                count_segment(
                    &old_lines[old_index..old_index + old_len],
                    &mut result.lines_deleted,
                    &mut result.blank_lines,
                );
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                count_segment(
                    &old_lines[old_index..old_index + old_len],
                    &mut result.lines_deleted,
                    &mut result.blank_lines,
                );
                count_segment(
                    &new_lines[new_index..new_index + new_len],
                    &mut result.lines_added,
                    &mut result.blank_lines,
                );
            }
        }
    }

    result
}

/// Adds a segment's line count, and its newline count when it is blank.
fn count_segment(lines: &[&str], counter: &mut u64, blank_lines: &mut u64) {
    *counter += lines.len() as u64;
    if lines.iter().all(|line| line.trim().is_empty()) {
        *blank_lines += lines
            .iter()
            .map(|line| line.matches('\n').count() as u64)
            .sum::<u64>();
    }
}

/// Counts characters added and deleted between `old` and `new`.
#[must_use]
pub fn char_diff(old: &str, new: &str) -> CharDiff {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(DIFF_TIMEOUT)
        .diff_chars(old, new);

    let mut result = CharDiff {
        character_count: new.chars().count() as u64,
        ..CharDiff::default()
    };

    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Insert { new_len, .. } => result.characters_added += new_len as u64,
            DiffOp::Delete { old_len, .. } => result.characters_deleted += old_len as u64,
            DiffOp::Replace {
                old_len, new_len, ..
            } => {
                result.characters_deleted += old_len as u64;
                result.characters_added += new_len as u64;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appended_line() {
        let diff = line_diff("a\nb\n", "a\nb\nc\n");
        assert_eq!(
            diff,
            LineDiff {
                lines_added: 1,
                lines_deleted: 0,
                blank_lines: 0,
            }
        );
    }

    #[test]
    fn test_identical_content_is_empty() {
        let diff = line_diff("fn main() {}\n", "fn main() {}\n");
        assert!(diff.is_empty());
        assert_eq!(diff.blank_lines, 0);
    }

    #[test]
    fn test_empty_baseline_counts_every_line() {
        let diff = line_diff("", "one\ntwo\nthree\n");
        assert_eq!(diff.lines_added, 3);
        assert_eq!(diff.lines_deleted, 0);
    }

    #[test]
    fn test_modified_line_counts_both_ways() {
        let diff = line_diff("hello\nworld\n", "hello\nrust\n");
        assert_eq!(diff.lines_added, 1);
        assert_eq!(diff.lines_deleted, 1);
        assert_eq!(diff.total_changes(), 2);
    }

    #[test]
    fn test_inserted_blank_lines() {
        let diff = line_diff("a\nb\n", "a\n\n\nb\n");
        assert_eq!(diff.lines_added, 2);
        assert_eq!(diff.blank_lines, 2);
    }

    #[test]
    fn test_deleted_blank_lines_are_counted() {
        let diff = line_diff("a\n\n  \nb\n", "a\nb\n");
        assert_eq!(diff.lines_deleted, 2);
        assert_eq!(diff.blank_lines, 2);
    }

    #[test]
    fn test_mixed_segment_is_not_blank() {
        let diff = line_diff("a\n", "a\n\nx\n");
        assert_eq!(diff.lines_added, 2);
        assert_eq!(diff.blank_lines, 0);
    }

    #[test]
    fn test_crlf_blank_lines() {
        let diff = line_diff("a\r\n", "a\r\n\r\n");
        assert_eq!(diff.lines_added, 1);
        assert_eq!(diff.blank_lines, 1);
    }

    #[test]
    fn test_char_diff_counts() {
        let diff = char_diff("hello", "help!");
        assert_eq!(diff.character_count, 5);
        assert_eq!(diff.characters_added, 2);
        assert_eq!(diff.characters_deleted, 2);
    }

    #[test]
    fn test_char_diff_unicode_length() {
        let diff = char_diff("", "héllo");
        assert_eq!(diff.character_count, 5);
        assert_eq!(diff.characters_added, 5);
        assert_eq!(diff.characters_deleted, 0);
    }
}
