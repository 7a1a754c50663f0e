use similar::{ChangeTag, TextDiff};
use warden_core::Hunk;

use super::PipelineError;

const CONTEXT_LINES: usize = 3;
const NO_NEWLINE: &str = "\\ No newline at end of file\n";

/// Unified-diff start for a 0-based range.
fn unified_start(start: usize, len: usize) -> usize {
    if len == 0 {
        start
    } else {
        start + 1
    }
}

/// Line hunks turning `old` into `new`, with three lines of context.
pub fn compute_hunks(old: &str, new: &str) -> Vec<Hunk> {
    let diff = TextDiff::from_lines(old, new);
    let mut hunks = Vec::new();
    for group in diff.grouped_ops(CONTEXT_LINES) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut body = String::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                body.push(match change.tag() {
                    ChangeTag::Equal => ' ',
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                });
                let value = change.value();
                body.push_str(value);
                if !value.ends_with('\n') {
                    body.push('\n');
                    body.push_str(NO_NEWLINE);
                }
            }
        }

        hunks.push(Hunk {
            old_start: unified_start(old_range.start, old_range.len()),
            old_lines: old_range.len(),
            new_start: unified_start(new_range.start, new_range.len()),
            new_lines: new_range.len(),
            body,
        });
    }
    hunks
}

/// Hunk body as (tag, line) pairs with line endings restored.
fn body_lines(body: &str) -> Vec<(char, String)> {
    let mut lines: Vec<(char, String)> = Vec::new();
    for raw in body.split_inclusive('\n') {
        if raw.starts_with('\\') {
            if let Some((_, prev)) = lines.last_mut() {
                if prev.ends_with('\n') {
                    prev.pop();
                }
            }
            continue;
        }
        let mut chars = raw.chars();
        let Some(tag) = chars.next() else {
            continue;
        };
        lines.push((tag, chars.as_str().to_string()));
    }
    lines
}

fn apply(old: &str, hunks: &[Hunk], reverse: bool) -> Result<String, PipelineError> {
    let source: Vec<&str> = old.split_inclusive('\n').collect();
    let mut out = String::with_capacity(old.len());
    let mut pos = 0;

    for hunk in hunks {
        let (start, len) = if reverse {
            (hunk.new_start, hunk.new_lines)
        } else {
            (hunk.old_start, hunk.old_lines)
        };
        let begin = if len == 0 { start } else { start.saturating_sub(1) };
        if begin < pos || begin > source.len() {
            return Err(PipelineError::HunkMismatch { line: start });
        }
        for line in &source[pos..begin] {
            out.push_str(line);
        }
        pos = begin;

        for (tag, text) in body_lines(&hunk.body) {
            let tag = match (tag, reverse) {
                ('+', true) => '-',
                ('-', true) => '+',
                (t, _) => t,
            };
            match tag {
                ' ' | '-' => {
                    if source.get(pos).copied() != Some(text.as_str()) {
                        return Err(PipelineError::HunkMismatch { line: pos + 1 });
                    }
                    if tag == ' ' {
                        out.push_str(&text);
                    }
                    pos += 1;
                }
                '+' => out.push_str(&text),
                _ => {}
            }
        }
    }
    for line in &source[pos..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Apply `hunks` to `old`. Fails when a context or removed line does not match.
pub fn apply_hunks(old: &str, hunks: &[Hunk]) -> Result<String, PipelineError> {
    apply(old, hunks, false)
}

/// Undo `hunks` on a file that currently holds their result.
pub fn reverse_hunks(new: &str, hunks: &[Hunk]) -> Result<String, PipelineError> {
    apply(new, hunks, true)
}
