//! Line diff between two prompt bodies.
//!
//! A longest-common-subsequence walk over lines, rendered as unified diff
//! hunks with three lines of context. A missing newline at the end of the
//! text counts as a change to the last line and is marked the way `diff -u`
//! marks it.

use std::fmt::Write as _;

use crate::models::VersionDiff;

/// Lines of unchanged context kept around each change.
const CONTEXT_LINES: usize = 3;

/// Largest LCS table filled, in cells. Bigger changed regions are diffed as
/// one replacement block.
const MAX_LCS_CELLS: usize = 4_000_000;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// One step of the edit script with the line it refers to.
#[derive(Debug, Clone, Copy)]
struct Step<'a> {
    op: Op,
    line: &'a str,
    /// Old-side line index before this step.
    old_index: usize,
    /// New-side line index before this step.
    new_index: usize,
    /// The line ends its text without a newline.
    no_newline: bool,
}

/// Diffs two texts line by line.
///
/// Identical inputs give `{0, 0, ""}`; any other pair gives at least one
/// changed line.
///
/// # Examples
///
/// ```rust
/// use promptvault::services::line_diff;
///
/// let diff = line_diff("Hello", "Hello\nWorld");
/// assert_eq!((diff.additions, diff.deletions), (1, 0));
/// assert!(diff.changes.contains("+World"));
/// ```
#[must_use]
pub fn line_diff(old: &str, new: &str) -> VersionDiff {
    if old == new {
        return VersionDiff::default();
    }

    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let mut steps = edit_script(&old_lines, &new_lines);
    mark_final_newline(&mut steps, old, new);

    let additions = steps.iter().filter(|s| s.op == Op::Insert).count();
    let deletions = steps.iter().filter(|s| s.op == Op::Delete).count();

    VersionDiff {
        additions,
        deletions,
        changes: render_hunks(&steps),
    }
}

/// Splits on `\n` only, so a `\r` stays part of its line.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n')
        .map(|line| line.strip_suffix('\n').unwrap_or(line))
        .collect()
}

/// When the texts differ only in whether they end with a newline, the last
/// line is replaced rather than kept, and the side without the newline is
/// flagged.
fn mark_final_newline(steps: &mut Vec<Step<'_>>, old: &str, new: &str) {
    let old_terminated = old.is_empty() || old.ends_with('\n');
    let new_terminated = new.is_empty() || new.ends_with('\n');
    if old_terminated == new_terminated {
        return;
    }
    let Some(last) = steps.last().copied().filter(|s| s.op == Op::Equal) else {
        return;
    };

    steps.pop();
    steps.push(Step {
        op: Op::Delete,
        no_newline: !old_terminated,
        ..last
    });
    steps.push(Step {
        op: Op::Insert,
        old_index: last.old_index + 1,
        no_newline: !new_terminated,
        ..last
    });
}

/// Builds the edit script, trimming the shared prefix and suffix before
/// filling the LCS table.
fn edit_script<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Step<'a>> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let mut steps = Vec::with_capacity(old.len() + new.len());
    let (mut oi, mut ni) = (0, 0);
    let mut push = |op: Op, line: &'a str| {
        steps.push(Step {
            op,
            line,
            old_index: oi,
            new_index: ni,
            no_newline: false,
        });
        match op {
            Op::Equal => {
                oi += 1;
                ni += 1;
            },
            Op::Delete => oi += 1,
            Op::Insert => ni += 1,
        }
    };

    for &line in &old[..prefix] {
        push(Op::Equal, line);
    }
    for (op, line) in middle_ops(a, b) {
        push(op, line);
    }
    for &line in &old[old.len() - suffix..] {
        push(Op::Equal, line);
    }

    steps
}

/// Edit operations for the changed middle of two texts.
fn middle_ops<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<(Op, &'a str)> {
    let width = b.len() + 1;
    let cells = (a.len() + 1).saturating_mul(width);
    if a.is_empty() || b.is_empty() || cells > MAX_LCS_CELLS {
        return a
            .iter()
            .map(|&line| (Op::Delete, line))
            .chain(b.iter().map(|&line| (Op::Insert, line)))
            .collect();
    }

    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![0_u32; cells];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            ops.push((Op::Equal, a[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            ops.push((Op::Delete, a[i]));
            i += 1;
        } else {
            ops.push((Op::Insert, b[j]));
            j += 1;
        }
    }
    ops.extend(a[i..].iter().map(|&line| (Op::Delete, line)));
    ops.extend(b[j..].iter().map(|&line| (Op::Insert, line)));
    ops
}

/// Groups changed steps into hunks, merging hunks whose context overlaps.
fn hunk_ranges(steps: &[Step<'_>]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (idx, _) in steps.iter().enumerate().filter(|(_, s)| s.op != Op::Equal) {
        let start = idx.saturating_sub(CONTEXT_LINES);
        let end = (idx + CONTEXT_LINES + 1).min(steps.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

fn render_hunks(steps: &[Step<'_>]) -> String {
    let mut out = String::new();
    for (start, end) in hunk_ranges(steps) {
        let hunk = &steps[start..end];
        let old_len = hunk.iter().filter(|s| s.op != Op::Insert).count();
        let new_len = hunk.iter().filter(|s| s.op != Op::Delete).count();
        // Unified diff numbers lines from 1; an empty side reports the
        // line before it.
        let old_start = hunk[0].old_index + usize::from(old_len > 0);
        let new_start = hunk[0].new_index + usize::from(new_len > 0);

        let _ = writeln!(out, "@@ -{old_start},{old_len} +{new_start},{new_len} @@");
        for step in hunk {
            let marker = match step.op {
                Op::Equal => ' ',
                Op::Delete => '-',
                Op::Insert => '+',
            };
            let _ = writeln!(out, "{marker}{}", step.line);
            if step.no_newline {
                let _ = writeln!(out, "{NO_NEWLINE_MARKER}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_identical_is_empty() {
        let diff = line_diff("a\nb\nc", "a\nb\nc");
        assert_eq!(diff, VersionDiff::default());
        assert!(diff.is_empty());
    }

    #[test_case("Hello", "Hello\nWorld", 1, 0 ; "append line")]
    #[test_case("a\nb\nc", "a\nc", 0, 1 ; "remove middle")]
    #[test_case("a\nb\nc", "a\nB\nc", 1, 1 ; "change middle")]
    #[test_case("", "x\ny", 2, 0 ; "from empty")]
    #[test_case("x\ny", "", 0, 2 ; "to empty")]
    #[test_case("a\nb", "b\na", 1, 1 ; "swap")]
    fn test_counts(old: &str, new: &str, additions: usize, deletions: usize) {
        let diff = line_diff(old, new);
        assert_eq!((diff.additions, diff.deletions), (additions, deletions));
        assert!(!diff.changes.is_empty());
    }

    #[test]
    fn test_unified_output() {
        let diff = line_diff("one\ntwo\nthree", "one\n2\nthree");
        assert_eq!(diff.changes, "@@ -1,3 +1,3 @@\n one\n-two\n+2\n three\n");
    }

    #[test]
    fn test_distant_changes_make_two_hunks() {
        let old: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
        let mut new = old.clone();
        new[1] = "two".to_string();
        new[18] = "nineteen".to_string();

        let diff = line_diff(&old.join("\n"), &new.join("\n"));
        assert_eq!(diff.changes.matches("@@ -").count(), 2);
        assert!(diff.changes.starts_with("@@ -1,5 +1,5 @@\n"));
        assert!(diff.changes.contains("@@ -16,5 +16,5 @@\n"));
    }

    #[test_case("Hello", "Hello\n" ; "newline added")]
    #[test_case("Hello\n", "Hello" ; "newline removed")]
    #[test_case("a\nb", "a\nb\n" ; "multi line")]
    fn test_final_newline_is_a_change(old: &str, new: &str) {
        let diff = line_diff(old, new);
        assert_eq!((diff.additions, diff.deletions), (1, 1));
        assert!(!diff.is_empty());
        assert_eq!(diff.changes.matches(NO_NEWLINE_MARKER).count(), 1);
    }

    #[test]
    fn test_final_newline_output() {
        let diff = line_diff("Hello", "Hello\n");
        assert_eq!(
            diff.changes,
            "@@ -1,1 +1,1 @@\n-Hello\n\\ No newline at end of file\n+Hello\n"
        );
    }

    #[test]
    fn test_carriage_returns_are_compared() {
        let diff = line_diff("a\r\nb", "a\nb");
        assert_eq!((diff.additions, diff.deletions), (1, 1));
    }

    #[test]
    fn test_large_rewrite_skips_table() {
        let old: Vec<String> = (0..3_000).map(|i| format!("old {i}")).collect();
        let new: Vec<String> = (0..3_000).map(|i| format!("new {i}")).collect();

        let diff = line_diff(&old.join("\n"), &new.join("\n"));
        assert_eq!((diff.additions, diff.deletions), (3_000, 3_000));
    }

    #[test]
    fn test_insert_into_empty_header() {
        let diff = line_diff("", "x");
        assert_eq!(diff.changes, "@@ -0,0 +1,1 @@\n+x\n");
    }
}
