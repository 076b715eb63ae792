//! Line-level diffing between the live buffer and a reference merge.
//!
//! Built on the `similar` crate. Two strategies share one contract: a plain
//! Myers line diff, and a token diff where every distinct line is interned to
//! a single symbol and the symbol sequences are diffed with Patience.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, DiffOp as SliceOp, TextDiff, capture_diff_slices};

use crate::types::DiffHunk;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAlgorithm {
    /// Myers over the raw lines.
    Lines,
    /// Patience over interned line tokens.
    #[default]
    Tokens,
}

impl std::str::FromStr for DiffAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lines" => Ok(DiffAlgorithm::Lines),
            "tokens" => Ok(DiffAlgorithm::Tokens),
            other => Err(format!("unknown diff algorithm: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTag {
    Equal,
    Removed,
    Added,
}

/// A run of lines sharing one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOp {
    pub tag: DiffTag,
    pub lines: Vec<String>,
}

impl DiffOp {
    pub fn count(&self) -> usize {
        self.lines.len()
    }
}

/// Split text the same way the buffer is split: on `\n`, keeping a trailing
/// empty line when the text ends with a newline.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

/// Diff two line sequences into tagged runs.
pub fn diff_lines<S: AsRef<str>>(old: &[S], new: &[S], algorithm: DiffAlgorithm) -> Vec<DiffOp> {
    let old: Vec<&str> = old.iter().map(AsRef::as_ref).collect();
    let new: Vec<&str> = new.iter().map(AsRef::as_ref).collect();

    let mut ops = Vec::new();
    match algorithm {
        DiffAlgorithm::Lines => {
            let diff = TextDiff::configure()
                .algorithm(Algorithm::Myers)
                .diff_slices(&old, &new);
            for change in diff.iter_all_changes() {
                let tag = match change.tag() {
                    ChangeTag::Equal => DiffTag::Equal,
                    ChangeTag::Delete => DiffTag::Removed,
                    ChangeTag::Insert => DiffTag::Added,
                };
                push_run(&mut ops, tag, std::iter::once(change.value()));
            }
        }
        DiffAlgorithm::Tokens => {
            let (old_tokens, new_tokens) = intern(&old, &new);
            for op in capture_diff_slices(Algorithm::Patience, &old_tokens, &new_tokens) {
                match op {
                    SliceOp::Equal { old_index, len, .. } => {
                        push_run(&mut ops, DiffTag::Equal, old[old_index..old_index + len].iter().copied());
                    }
                    SliceOp::Delete { old_index, old_len, .. } => {
                        push_run(&mut ops, DiffTag::Removed, old[old_index..old_index + old_len].iter().copied());
                    }
                    SliceOp::Insert { new_index, new_len, .. } => {
                        push_run(&mut ops, DiffTag::Added, new[new_index..new_index + new_len].iter().copied());
                    }
                    SliceOp::Replace { old_index, old_len, new_index, new_len } => {
                        push_run(&mut ops, DiffTag::Removed, old[old_index..old_index + old_len].iter().copied());
                        push_run(&mut ops, DiffTag::Added, new[new_index..new_index + new_len].iter().copied());
                    }
                }
            }
        }
    }
    ops
}

/// Map every distinct line to a small integer shared by both sides.
fn intern<'a>(old: &[&'a str], new: &[&'a str]) -> (Vec<u32>, Vec<u32>) {
    let mut table: HashMap<&'a str, u32> = HashMap::new();
    let mut token = |line: &'a str| {
        let next = table.len() as u32;
        *table.entry(line).or_insert(next)
    };
    let old_tokens = old.iter().map(|l| token(*l)).collect();
    let new_tokens = new.iter().map(|l| token(*l)).collect();
    (old_tokens, new_tokens)
}

fn push_run<'a>(ops: &mut Vec<DiffOp>, tag: DiffTag, lines: impl Iterator<Item = &'a str>) {
    let lines = lines.map(str::to_string);
    if let Some(last) = ops.last_mut().filter(|last| last.tag == tag) {
        last.lines.extend(lines);
        return;
    }
    let lines: Vec<String> = lines.collect();
    if !lines.is_empty() {
        ops.push(DiffOp { tag, lines });
    }
}

/// Coalesce contiguous removed/added runs into hunks numbered against the old
/// text.
///
/// Hunks whose old and new sides differ only in whitespace are dropped, as are
/// hunks ending before the 1-based `min_start_line` (0 keeps everything).
pub fn build_hunks(ops: &[DiffOp], min_start_line: usize) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<DiffHunk> = None;
    let mut line_no = 1;

    for op in ops {
        match op.tag {
            DiffTag::Equal => {
                hunks.extend(current.take());
                line_no += op.count();
            }
            DiffTag::Removed => {
                let hunk = current.get_or_insert_with(|| empty_hunk(line_no));
                hunk.offset += op.count();
                hunk.old_lines.extend(op.lines.iter().cloned());
                line_no += op.count();
            }
            DiffTag::Added => {
                let hunk = current.get_or_insert_with(|| empty_hunk(line_no));
                hunk.new_lines.extend(op.lines.iter().cloned());
            }
        }
    }
    hunks.extend(current);

    hunks
        .into_iter()
        .filter(|h| h.end() >= min_start_line && !h.is_whitespace_only())
        .collect()
}

fn empty_hunk(start: usize) -> DiffHunk {
    DiffHunk {
        start,
        offset: 0,
        old_lines: Vec::new(),
        new_lines: Vec::new(),
    }
}

/// `diff_lines` followed by `build_hunks`.
pub fn hunks<S: AsRef<str>>(
    old: &[S],
    new: &[S],
    min_start_line: usize,
    algorithm: DiffAlgorithm,
) -> Vec<DiffHunk> {
    build_hunks(&diff_lines(old, new, algorithm), min_start_line)
}
