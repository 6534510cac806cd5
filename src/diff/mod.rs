//! Line-level diffs between configuration bodies.
//!
//! Lines keep their terminators so a diff can be replayed onto the previous
//! body to reproduce the new one byte for byte.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lines of unchanged context around each hunk
pub const CONTEXT_LINES: usize = 3;

/// Above this many LCS cells the middle section is emitted as a block replace.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Unified diff of one configuration body against its predecessor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDiff {
    pub diff_lines: Vec<String>,
    pub added_lines: usize,
    pub removed_lines: usize,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added_lines == 0 && self.removed_lines == 0
    }

    /// Short change-size summary, e.g. `+3/-1`
    pub fn summary(&self) -> String {
        format!("+{}/-{}", self.added_lines, self.removed_lines)
    }

    /// Render the diff as a single unified-diff document
    pub fn to_unified(&self) -> String {
        self.diff_lines.concat()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("Malformed diff: {0}")]
    Malformed(String),

    #[error("Diff does not apply: context mismatch at line {0}")]
    ContextMismatch(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op<'a> {
    Equal(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

/// Split text into lines, keeping each line's terminator
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Compute the diff between `previous` and `current`.
///
/// Returns `None` when there is no previous body (the first version of a host).
pub fn diff_configs(previous: Option<&str>, current: &str) -> Option<ConfigDiff> {
    let previous = previous?;
    let old = split_lines(previous);
    let new = split_lines(current);
    let ops = edit_script(&old, &new);

    let added_lines = ops.iter().filter(|op| matches!(op, Op::Insert(_))).count();
    let removed_lines = ops.iter().filter(|op| matches!(op, Op::Delete(_))).count();

    if added_lines == 0 && removed_lines == 0 {
        return Some(ConfigDiff {
            diff_lines: Vec::new(),
            added_lines,
            removed_lines,
        });
    }

    let mut diff_lines = vec!["--- previous\n".to_string(), "+++ current\n".to_string()];
    for (start, end) in hunk_ranges(&ops) {
        diff_lines.extend(render_hunk(&ops, start, end));
    }

    Some(ConfigDiff {
        diff_lines,
        added_lines,
        removed_lines,
    })
}

/// Replay `diff` onto `previous`, reproducing the body it was computed against.
pub fn apply_diff(previous: &str, diff: &ConfigDiff) -> Result<String, DiffError> {
    let old = split_lines(previous);
    let mut lines = diff.diff_lines.iter().peekable();

    if diff.diff_lines.is_empty() {
        return Ok(previous.to_string());
    }

    match (lines.next(), lines.next()) {
        (Some(from), Some(to)) if from.starts_with("--- ") && to.starts_with("+++ ") => {}
        _ => return Err(DiffError::Malformed("missing file headers".to_string())),
    }

    let mut output = String::with_capacity(previous.len());
    let mut cursor = 0usize;

    while let Some(header) = lines.next() {
        let (old_start, _) = parse_hunk_header(header)?;
        if old_start < cursor || old_start > old.len() {
            return Err(DiffError::Malformed(format!(
                "hunk starts at line {} out of order",
                old_start + 1
            )));
        }
        for line in &old[cursor..old_start] {
            output.push_str(line);
        }
        cursor = old_start;

        while let Some(line) = lines.next_if(|l| !l.starts_with("@@ ")) {
            let mut chars = line.chars();
            let marker = chars.next();
            let body = chars.as_str();
            match marker {
                Some(' ') | Some('-') => {
                    if old.get(cursor) != Some(&body) {
                        return Err(DiffError::ContextMismatch(cursor + 1));
                    }
                    if marker == Some(' ') {
                        output.push_str(body);
                    }
                    cursor += 1;
                }
                Some('+') => output.push_str(body),
                _ => {
                    return Err(DiffError::Malformed(format!(
                        "unexpected diff line {:?}",
                        line
                    )))
                }
            }
        }
    }

    for line in &old[cursor..] {
        output.push_str(line);
    }

    Ok(output)
}

fn edit_script<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
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

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops: Vec<Op<'a>> = old[..prefix].iter().map(|l| Op::Equal(l)).collect();

    if (old_mid.len() + 1).saturating_mul(new_mid.len() + 1) > MAX_LCS_CELLS {
        ops.extend(old_mid.iter().map(|l| Op::Delete(l)));
        ops.extend(new_mid.iter().map(|l| Op::Insert(l)));
    } else {
        ops.extend(lcs_script(old_mid, new_mid));
    }

    ops.extend(old[old.len() - suffix..].iter().map(|l| Op::Equal(l)));
    ops
}

fn lcs_script<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Equal(old[i]));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(Op::Delete(old[i]));
            i += 1;
        } else {
            ops.push(Op::Insert(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|l| Op::Delete(l)));
    ops.extend(new[j..].iter().map(|l| Op::Insert(l)));
    ops
}

fn hunk_ranges(ops: &[Op<'_>]) -> Vec<(usize, usize)> {
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(_)))
        .map(|(idx, _)| idx)
        .collect();

    let mut ranges = Vec::new();
    let Some(&first) = changes.first() else {
        return ranges;
    };

    let mut start = first.saturating_sub(CONTEXT_LINES);
    let mut end = (first + 1 + CONTEXT_LINES).min(ops.len());
    for &idx in &changes[1..] {
        if idx.saturating_sub(CONTEXT_LINES) <= end {
            end = (idx + 1 + CONTEXT_LINES).min(ops.len());
        } else {
            ranges.push((start, end));
            start = idx - CONTEXT_LINES;
            end = (idx + 1 + CONTEXT_LINES).min(ops.len());
        }
    }
    ranges.push((start, end));
    ranges
}

fn render_hunk(ops: &[Op<'_>], start: usize, end: usize) -> Vec<String> {
    let old_before = ops[..start]
        .iter()
        .filter(|op| !matches!(op, Op::Insert(_)))
        .count();
    let new_before = ops[..start]
        .iter()
        .filter(|op| !matches!(op, Op::Delete(_)))
        .count();
    let old_len = ops[start..end]
        .iter()
        .filter(|op| !matches!(op, Op::Insert(_)))
        .count();
    let new_len = ops[start..end]
        .iter()
        .filter(|op| !matches!(op, Op::Delete(_)))
        .count();

    let mut lines = vec![format!(
        "@@ -{} +{} @@\n",
        format_range(old_before, old_len),
        format_range(new_before, new_len)
    )];
    lines.extend(ops[start..end].iter().map(|op| match op {
        Op::Equal(l) => format!(" {}", l),
        Op::Delete(l) => format!("-{}", l),
        Op::Insert(l) => format!("+{}", l),
    }));
    lines
}

fn format_range(before: usize, len: usize) -> String {
    // An empty range names the line before it, as in GNU diff
    let beginning = if len == 0 { before } else { before + 1 };
    format!("{},{}", beginning, len)
}

/// Returns the zero-based old start and the old length
fn parse_hunk_header(header: &str) -> Result<(usize, usize), DiffError> {
    let malformed = || DiffError::Malformed(format!("bad hunk header {:?}", header.trim_end()));

    let inner = header
        .trim_end()
        .strip_prefix("@@ -")
        .and_then(|rest| rest.strip_suffix(" @@"))
        .ok_or_else(malformed)?;
    let old_range = inner.split(' ').next().ok_or_else(malformed)?;
    let (start, len) = old_range.split_once(',').ok_or_else(malformed)?;
    let start: usize = start.parse().map_err(|_| malformed())?;
    let len: usize = len.parse().map_err(|_| malformed())?;

    let zero_based = if len == 0 { start } else { start.checked_sub(1).ok_or_else(malformed)? };
    Ok((zero_based, len))
}

#[cfg(test)]
mod tests;
