//! Line-level comparison of two text renderings.
//!
//! Used to decide whether two PGN exports are equivalent and, when they are
//! not, to point at the exact line ranges that differ.
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Lines of unchanged text shown around each hunk.
pub const DEFAULT_CONTEXT: usize = 3;

/// Middle sections larger than this (left lines x right lines) are reported
/// as one hunk instead of being aligned line by line.
const MAX_ALIGNMENT_CELLS: usize = 4_000_000;

/// One run of differing lines.
///
/// Line numbers are 1-based. For a pure insertion `left_lines` is empty and
/// `left_start` is the line the insertion precedes; likewise for deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    pub left_start: usize,
    pub left_lines: Vec<String>,
    pub right_start: usize,
    pub right_lines: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_before: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_after: Vec<String>,
}

impl Hunk {
    /// Inclusive left line range covered by the change, if it removes anything.
    pub fn left_range(&self) -> Option<(usize, usize)> {
        line_range(self.left_start, self.left_lines.len())
    }

    pub fn right_range(&self) -> Option<(usize, usize)> {
        line_range(self.right_start, self.right_lines.len())
    }
}

fn line_range(start: usize, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    Some((start, start + len - 1))
}

/// Rewrite `\r\n` and lone `\r` as `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn split_lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

pub fn compare_files(left: &Path, right: &Path, context: usize) -> Result<Vec<Hunk>> {
    let left_text = read_lossy(left)?;
    let right_text = read_lossy(right)?;
    Ok(diff_lines(&left_text, &right_text, context))
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Compare two texts line by line after line-ending normalization.
pub fn diff_lines(left: &str, right: &str, context: usize) -> Vec<Hunk> {
    let left = normalize_line_endings(left);
    let right = normalize_line_endings(right);
    let a = split_lines(&left);
    let b = split_lines(&right);

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    if a_mid.is_empty() && b_mid.is_empty() {
        return Vec::new();
    }

    let spans = if a_mid.len().saturating_mul(b_mid.len()) > MAX_ALIGNMENT_CELLS {
        vec![Span {
            left: (0, a_mid.len()),
            right: (0, b_mid.len()),
        }]
    } else {
        align(a_mid, b_mid)
    };

    let mut hunks = Vec::with_capacity(spans.len());
    for (idx, span) in spans.iter().enumerate() {
        let left_begin = prefix + span.left.0;
        let left_end = prefix + span.left.1;
        let right_begin = prefix + span.right.0;
        let right_end = prefix + span.right.1;

        let previous_end = idx
            .checked_sub(1)
            .map(|prev| prefix + spans[prev].left.1)
            .unwrap_or(0);
        let next_begin = spans
            .get(idx + 1)
            .map(|next| prefix + next.left.0)
            .unwrap_or(a.len());
        let before_begin = left_begin.saturating_sub(context).max(previous_end);
        let after_end = (left_end + context).min(next_begin);

        hunks.push(Hunk {
            left_start: left_begin + 1,
            left_lines: owned(&a[left_begin..left_end]),
            right_start: right_begin + 1,
            right_lines: owned(&b[right_begin..right_end]),
            context_before: owned(&a[before_begin..left_begin]),
            context_after: owned(&a[left_end..after_end]),
        });
    }
    hunks
}

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

/// Half-open index ranges of one change within the middle sections.
struct Span {
    left: (usize, usize),
    right: (usize, usize),
}

/// Longest-common-subsequence alignment; returns the non-matching runs.
fn align(a: &[&str], b: &[&str]) -> Vec<Span> {
    let width = b.len() + 1;
    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![0u32; (a.len() + 1) * width];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut spans = Vec::new();
    let mut open: Option<Span> = None;
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            spans.extend(open.take());
            i += 1;
            j += 1;
            continue;
        }
        let span = open.get_or_insert(Span {
            left: (i, i),
            right: (j, j),
        });
        let delete = j == b.len()
            || (i < a.len() && lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]);
        if delete {
            i += 1;
            span.left.1 = i;
        } else {
            j += 1;
            span.right.1 = j;
        }
    }
    spans.extend(open);
    spans
}

/// Render hunks in unified diff form.
///
/// Hunks whose context windows touch are printed under one `@@` header, so a
/// shared context line appears once.
pub fn render_unified(left_label: &str, right_label: &str, hunks: &[Hunk]) -> String {
    let mut out = String::new();
    if hunks.is_empty() {
        return out;
    }
    let _ = writeln!(out, "--- {left_label}");
    let _ = writeln!(out, "+++ {right_label}");
    for group in group_hunks(hunks) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let before = first.context_before.len();
        let left_begin = first.left_start - before;
        let right_begin = first.right_start - before;
        let left_end = last.left_start + last.left_lines.len() + last.context_after.len();
        let right_end = last.right_start + last.right_lines.len() + last.context_after.len();
        let _ = writeln!(
            out,
            "@@ -{} +{} @@",
            header_range(left_begin, left_end - left_begin),
            header_range(right_begin, right_end - right_begin)
        );
        for line in &first.context_before {
            let _ = writeln!(out, " {line}");
        }
        for (idx, hunk) in group.iter().enumerate() {
            for line in &hunk.left_lines {
                let _ = writeln!(out, "-{line}");
            }
            for line in &hunk.right_lines {
                let _ = writeln!(out, "+{line}");
            }
            let shared = match group.get(idx + 1) {
                Some(next) => gap_lines(hunk, next),
                None => hunk.context_after.iter().collect(),
            };
            for line in shared {
                let _ = writeln!(out, " {line}");
            }
        }
    }
    out
}

/// Unchanged left lines between the end of `hunk` and the start of `next`.
fn gap(hunk: &Hunk, next: &Hunk) -> usize {
    next.left_start - (hunk.left_start + hunk.left_lines.len())
}

/// Split hunks into runs whose context covers every line between them.
fn group_hunks(hunks: &[Hunk]) -> Vec<&[Hunk]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for idx in 1..hunks.len() {
        let (prev, next) = (&hunks[idx - 1], &hunks[idx]);
        if gap(prev, next) > prev.context_after.len() + next.context_before.len() {
            groups.push(&hunks[start..idx]);
            start = idx;
        }
    }
    groups.push(&hunks[start..]);
    groups
}

/// The gap between two grouped hunks, each line once.
fn gap_lines<'a>(hunk: &'a Hunk, next: &'a Hunk) -> Vec<&'a String> {
    let covered = hunk.context_after.len() + next.context_before.len();
    let overlap = covered.saturating_sub(gap(hunk, next));
    hunk.context_after
        .iter()
        .chain(next.context_before.iter().skip(overlap))
        .collect()
}

fn header_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start.saturating_sub(1)),
        1 => start.to_string(),
        _ => format!("{start},{len}"),
    }
}
