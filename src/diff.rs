//! Unified diff rendering for explain mode
//!
//! Produces a colored, GitHub-style diff between two text blobs: grouped
//! hunks with a configurable amount of context and word-level emphasis
//! inside replaced lines. Only invoked when explain mode is active.

use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;
use std::ops::Range;

/// Render a unified diff between `old` and `new`. Returns an empty
/// string when the inputs are identical.
pub fn unified_diff(
    old: &str,
    new: &str,
    old_label: &str,
    new_label: &str,
    context_lines: usize,
) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    let mut started = false;

    for group in diff.grouped_ops(context_lines) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };

        if !started {
            started = true;
            let _ = writeln!(out, "{}", format!("--- {old_label}").bold());
            let _ = writeln!(out, "{}", format!("+++ {new_label}").bold());
        }

        let old_range = format_range(first.old_range().start..last.old_range().end);
        let new_range = format_range(first.new_range().start..last.new_range().end);
        let _ = writeln!(out, "{}", format!("@@ -{old_range} +{new_range} @@").cyan());

        for op in &group {
            for change in diff.iter_inline_changes(op) {
                let line = match change.tag() {
                    ChangeTag::Equal => inline_text(&change, ' ', |s, _| s.normal()),
                    ChangeTag::Delete => inline_text(&change, '-', |s, emphasized| {
                        if emphasized { s.red().bold() } else { s.red() }
                    }),
                    ChangeTag::Insert => inline_text(&change, '+', |s, emphasized| {
                        if emphasized { s.green().bold() } else { s.green() }
                    }),
                };
                let _ = writeln!(out, "{line}");
            }
        }
    }

    out
}

/// Assemble one diff line from its inline pieces, bolding the words
/// that actually differ inside replaced lines.
fn inline_text(
    change: &similar::InlineChange<str>,
    sign: char,
    style: fn(&str, bool) -> colored::ColoredString,
) -> String {
    let mut text = String::new();
    let _ = write!(text, "{}", style(&sign.to_string(), false));
    for (emphasized, piece) in change.iter_strings_lossy() {
        let piece = piece.strip_suffix('\n').unwrap_or(&piece).to_string();
        if piece.is_empty() {
            continue;
        }
        let _ = write!(text, "{}", style(&piece, emphasized));
    }
    text
}

// Range formatting as unified diff headers expect: one-based start, and
// a length only when it is not exactly one line.
fn format_range(range: Range<usize>) -> String {
    let mut beginning = range.start + 1;
    let length = range.end - range.start;
    if length == 1 {
        return beginning.to_string();
    }
    if length == 0 {
        beginning -= 1;
    }
    format!("{beginning},{length}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_diff(old: &str, new: &str) -> String {
        colored::control::set_override(false);
        unified_diff(old, new, "before", "after", 1)
    }

    #[test]
    fn test_identical_inputs_yield_nothing() {
        assert_eq!(plain_diff("a\nb\n", "a\nb\n"), "");
    }

    #[test]
    fn test_replaced_line() {
        let out = plain_diff("a\nb\nc\n", "a\nx\nc\n");
        assert!(out.contains("--- before"));
        assert!(out.contains("+++ after"));
        assert!(out.contains("@@ -1,3 +1,3 @@"));
        assert!(out.contains("-b"));
        assert!(out.contains("+x"));
    }

    #[test]
    fn test_context_limits_hunk() {
        let old = "1\n2\n3\n4\n5\n6\n7\n8\n9\n";
        let new = "1\n2\n3\n4\nfive\n6\n7\n8\n9\n";
        let out = plain_diff(old, new);
        // one line of context around the change, the rest elided
        assert!(out.contains(" 4"));
        assert!(out.contains(" 6"));
        assert!(!out.contains(" 1"));
        assert!(!out.contains(" 9"));
    }

    #[test]
    fn test_insertion_range_header() {
        let out = plain_diff("a\n", "a\nb\n");
        assert!(out.contains("@@ -1 +1,2 @@"));
        assert!(out.contains("+b"));
    }

    #[test]
    fn test_format_range() {
        assert_eq!(format_range(0..1), "1");
        assert_eq!(format_range(0..3), "1,3");
        assert_eq!(format_range(2..2), "2,0");
    }
}
