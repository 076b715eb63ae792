//! Folding diff hunks into semantic patches.
//!
//! A hunk that touches a conflict block is widened to cover the whole block,
//! so that applying it resolves the block in one step. Unchanged lines between
//! the hunks of a block are copied from the buffer to keep the replacement
//! contiguous.

use crate::types::{ConflictBlock, DiffHunk, SemanticPatch};

/// Hunks sharing a patch, plus the 1-based inclusive span it replaces.
struct Group {
    hunks: Vec<usize>,
    start: usize,
    end: usize,
}

pub fn reconcile<S: AsRef<str>>(
    current: &[S],
    hunks: &[DiffHunk],
    blocks: &[ConflictBlock],
) -> Vec<SemanticPatch> {
    let mut groups: Vec<Group> = Vec::new();
    let mut used = vec![false; hunks.len()];

    for block in blocks {
        let touching: Vec<usize> = hunks
            .iter()
            .enumerate()
            .filter(|(_, h)| block.intersects(h.start, h.end()))
            .map(|(i, _)| i)
            .collect();
        if touching.is_empty() {
            continue;
        }

        let mut start = block.our_marker_line;
        let mut end = block.end_marker_line;
        for &i in &touching {
            start = start.min(hunks[i].start);
            end = end.max(hunks[i].end());
        }

        // a hunk spanning two blocks folds both into one patch
        if let Some(last) = groups.last_mut() {
            let shares_hunk = touching.iter().any(|i| last.hunks.contains(i));
            if shares_hunk || start <= last.end {
                last.start = last.start.min(start);
                last.end = last.end.max(end);
                for i in touching {
                    if !last.hunks.contains(&i) {
                        last.hunks.push(i);
                    }
                    used[i] = true;
                }
                continue;
            }
        }

        for &i in &touching {
            used[i] = true;
        }
        groups.push(Group {
            hunks: touching,
            start,
            end,
        });
    }

    let mut patches: Vec<SemanticPatch> = groups
        .into_iter()
        .map(|group| merge_group(current, hunks, group))
        .collect();
    patches.extend(
        hunks
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .map(|(h, _)| SemanticPatch::from(h.clone())),
    );
    patches.sort_by_key(|p| (p.start, p.offset));
    patches
}

fn merge_group<S: AsRef<str>>(current: &[S], hunks: &[DiffHunk], group: Group) -> SemanticPatch {
    let mut members: Vec<&DiffHunk> = group.hunks.iter().map(|&i| &hunks[i]).collect();
    members.sort_by_key(|h| h.start);

    let mut new_lines = Vec::new();
    let mut cursor = group.start;
    for hunk in members {
        if hunk.start > cursor {
            new_lines.extend(filler(current, cursor, hunk.start - 1));
        }
        new_lines.extend(hunk.new_lines.iter().cloned());
        cursor = cursor.max(hunk.start + hunk.offset);
    }
    if cursor <= group.end {
        new_lines.extend(filler(current, cursor, group.end));
    }

    SemanticPatch {
        start: group.start,
        offset: group.end - group.start + 1,
        new_lines,
    }
}

/// Buffer lines `from..=to`, 1-based.
fn filler<S: AsRef<str>>(current: &[S], from: usize, to: usize) -> impl Iterator<Item = String> + '_ {
    current
        .get(from - 1..to.min(current.len()))
        .unwrap_or(&[])
        .iter()
        .map(|l| l.as_ref().to_string())
}

/// Apply every patch to a copy of `lines`, back to front so earlier line
/// numbers stay valid.
pub fn apply_patches<S: AsRef<str>>(lines: &[S], patches: &[SemanticPatch]) -> Vec<String> {
    let mut out: Vec<String> = lines.iter().map(|l| l.as_ref().to_string()).collect();
    let mut ordered: Vec<&SemanticPatch> = patches.iter().collect();
    ordered.sort_by_key(|p| (p.start, p.offset));
    for patch in ordered.into_iter().rev() {
        patch.apply(&mut out);
    }
    out
}
