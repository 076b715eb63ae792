//! The live resolution buffer and its undo/redo history.
//!
//! [`BufferVersionManager`] is the single writer for one file. Every mutation
//! goes through it, re-parses the outstanding conflict blocks, recomputes the
//! semantic patches against the heuristic engine's merged reference, and
//! reports a [`Transition`] to its observers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregator::{
    CandidateUpdate, ChoiceAudit, ResolutionAggregator, ResolveContext, ResolvedChoice,
};
use crate::diff::{DiffAlgorithm, hunks, split_lines};
use crate::error::{ResolveError, Result};
use crate::fingerprint::FingerprintIndex;
use crate::parser::parse;
use crate::reconcile::reconcile;
use crate::types::{BlockSides, ConflictBlock, Interval, ResolutionChoice, SemanticPatch};

/// A pending "put `choice` into `block`" request, used as the key of the
/// location mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// 1-based block index, relative to the blocks found at load time.
    pub block: usize,
    pub choice: ResolutionChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    /// Nothing to undo.
    Clean,
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Apply,
    Edit,
    Undo,
    Redo,
    Reset,
    Candidates,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionKind::Apply => "apply",
            TransitionKind::Edit => "edit",
            TransitionKind::Undo => "undo",
            TransitionKind::Redo => "redo",
            TransitionKind::Reset => "reset",
            TransitionKind::Candidates => "candidates",
        };
        f.write_str(name)
    }
}

/// What a mutation left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub outstanding: usize,
    pub patches: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    pub state: BufferState,
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub transition: Transition,
    pub request: ApplyRequest,
    pub audit: ChoiceAudit,
}

type Observer = Box<dyn Fn(&Transition) + Send + Sync>;

pub struct BufferVersionManager {
    original: Vec<String>,
    blocks: Vec<ConflictBlock>,
    fingerprints: FingerprintIndex,
    current: Vec<String>,
    undo_stack: Vec<Vec<String>>,
    redo_stack: Vec<Vec<String>>,
    location_mapping: HashMap<ApplyRequest, Interval>,
    outstanding: Vec<ConflictBlock>,
    patches: Vec<SemanticPatch>,
    initial_patches: Vec<SemanticPatch>,
    aggregator: ResolutionAggregator,
    algorithm: DiffAlgorithm,
    observers: Vec<Observer>,
}

impl fmt::Debug for BufferVersionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferVersionManager")
            .field("lines", &self.current.len())
            .field("blocks", &self.blocks.len())
            .field("outstanding", &self.outstanding.len())
            .field("patches", &self.patches.len())
            .field("undo", &self.undo_stack.len())
            .field("redo", &self.redo_stack.len())
            .finish()
    }
}

impl BufferVersionManager {
    pub fn new(content: &str, algorithm: DiffAlgorithm) -> Self {
        Self::from_lines(split_lines(content), algorithm)
    }

    pub fn from_lines(lines: Vec<String>, algorithm: DiffAlgorithm) -> Self {
        let blocks = parse(&lines);
        let fingerprints = FingerprintIndex::build(&lines, &blocks);
        debug!(lines = lines.len(), blocks = blocks.len(), "loaded buffer");
        Self {
            current: lines.clone(),
            outstanding: blocks.clone(),
            original: lines,
            blocks,
            fingerprints,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            location_mapping: HashMap::new(),
            patches: Vec::new(),
            initial_patches: Vec::new(),
            aggregator: ResolutionAggregator::new(),
            algorithm,
            observers: Vec::new(),
        }
    }

    pub fn original(&self) -> &[String] {
        &self.original
    }

    /// Blocks found at load time. Apply requests index into these.
    pub fn blocks(&self) -> &[ConflictBlock] {
        &self.blocks
    }

    pub fn fingerprints(&self) -> &FingerprintIndex {
        &self.fingerprints
    }

    pub fn current(&self) -> &[String] {
        &self.current
    }

    pub fn content(&self) -> String {
        self.current.join("\n")
    }

    /// Blocks still present in the current buffer.
    pub fn outstanding(&self) -> &[ConflictBlock] {
        &self.outstanding
    }

    pub fn patches(&self) -> &[SemanticPatch] {
        &self.patches
    }

    /// Patches computed when the merged reference arrived, before any edit.
    pub fn initial_patches(&self) -> &[SemanticPatch] {
        &self.initial_patches
    }

    pub fn aggregator(&self) -> &ResolutionAggregator {
        &self.aggregator
    }

    pub fn algorithm(&self) -> DiffAlgorithm {
        self.algorithm
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn state(&self) -> BufferState {
        if self.undo_stack.is_empty() {
            BufferState::Clean
        } else {
            BufferState::Dirty
        }
    }

    pub fn block_sides(&self, block: usize) -> Result<BlockSides> {
        self.load_block(block).map(|b| b.sides(&self.original))
    }

    fn load_block(&self, block: usize) -> Result<&ConflictBlock> {
        block
            .checked_sub(1)
            .and_then(|i| self.blocks.get(i))
            .ok_or(ResolveError::BlockOutOfRange {
                block,
                count: self.blocks.len(),
            })
    }

    /// Register a callback run after every transition.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Locate where the requested block currently sits and remember it for
    /// the upcoming apply.
    pub fn prepare_apply(&mut self, request: ApplyRequest) -> Result<Interval> {
        self.load_block(request.block)?;
        let interval = self
            .fingerprints
            .locate(&self.current, request.block)
            .ok_or(ResolveError::LocationNotFound {
                block: request.block,
            })?;
        self.location_mapping.insert(request, interval);
        Ok(interval)
    }

    pub fn located(&self, request: &ApplyRequest) -> Option<Interval> {
        self.location_mapping.get(request).copied()
    }

    /// Replace `block` with the content of `choice`.
    pub fn apply_resolution(&mut self, block: usize, choice: ResolutionChoice) -> Result<Applied> {
        let request = ApplyRequest { block, choice };
        match self.try_apply(request) {
            Ok(applied) => Ok(applied),
            Err(e) => {
                warn!(block, %choice, error = %e, "apply failed");
                Err(e)
            }
        }
    }

    fn try_apply(&mut self, request: ApplyRequest) -> Result<Applied> {
        let (from, len) = match request.choice {
            ResolutionChoice::SemanticPatch(index) => {
                let patch = self
                    .patches
                    .get(index)
                    .ok_or(ResolveError::PatchOutOfRange { index })?;
                if patch.start == 0 || patch.start - 1 + patch.offset > self.current.len() {
                    return Err(ResolveError::PatchOutOfRange { index });
                }
                let (from, len) = (patch.start - 1, patch.offset);
                // the patch must belong to the block it is applied to
                let at = self.prepare_apply(request)?;
                if !self.patches[index].touches(at) {
                    return Err(ResolveError::PatchOutOfRange { index });
                }
                (from, len)
            }
            _ => {
                let interval = self.prepare_apply(request)?;
                (interval.start, interval.line_count())
            }
        };

        let ResolvedChoice { lines, audit, .. } = self.aggregator.resolve(
            request.block,
            request.choice,
            &ResolveContext {
                original: &self.original,
                blocks: &self.blocks,
                patches: &self.patches,
                initial_patches: &self.initial_patches,
            },
        )?;

        let mut next = self.current.clone();
        next.splice(from..from + len, lines);
        self.push_version(next);
        self.refresh(from + 1);

        let transition = self.emit(TransitionKind::Apply);
        Ok(Applied {
            transition,
            request,
            audit,
        })
    }

    /// Replace the whole buffer with a manual edit made around 1-based `line`.
    /// Returns `None` when the content did not change.
    pub fn edit(&mut self, content: &str, line: usize) -> Option<Transition> {
        let next = split_lines(content);
        if next == self.current {
            return None;
        }
        self.push_version(next);
        self.refresh(line);
        Some(self.emit(TransitionKind::Edit))
    }

    pub fn undo(&mut self) -> Option<Transition> {
        let previous = self.undo_stack.pop()?;
        let current = std::mem::replace(&mut self.current, previous);
        self.redo_stack.push(current);
        self.location_mapping.clear();
        self.refresh(0);
        Some(self.emit(TransitionKind::Undo))
    }

    pub fn redo(&mut self) -> Option<Transition> {
        let next = self.redo_stack.pop()?;
        let current = std::mem::replace(&mut self.current, next);
        self.undo_stack.push(current);
        self.location_mapping.clear();
        self.refresh(0);
        Some(self.emit(TransitionKind::Redo))
    }

    /// Back to the file as loaded. Candidates are kept.
    pub fn reset(&mut self) -> Transition {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.location_mapping.clear();
        self.current = self.original.clone();
        self.refresh(0);
        self.emit(TransitionKind::Reset)
    }

    /// Feed an engine result into the aggregator.
    pub fn commit(&mut self, update: CandidateUpdate) -> Transition {
        let source = update.source();
        let effect = self.aggregator.commit(update);
        if effect.merged_changed {
            self.refresh(0);
            self.initial_patches = self.patches.clone();
            debug!(%source, patches = self.patches.len(), "merged reference changed");
        }
        self.emit(TransitionKind::Candidates)
    }

    fn push_version(&mut self, next: Vec<String>) {
        let previous = std::mem::replace(&mut self.current, next);
        self.undo_stack.push(previous);
        self.redo_stack.clear();
        self.location_mapping.clear();
    }

    /// Re-parse the buffer and re-diff it against the merged reference from
    /// 1-based `anchor` on (0 for the whole buffer). Patches ending before the
    /// anchor sit on unchanged lines and are kept as they are.
    fn refresh(&mut self, anchor: usize) {
        self.outstanding = parse(&self.current);
        let Some(merged) = self.aggregator.merged() else {
            self.patches = Vec::new();
            return;
        };
        let anchor = match self.undo_stack.last() {
            Some(previous) if anchor > 1 => {
                match anchor.min(common_prefix(previous, &self.current) + 1) {
                    1 => 0,
                    kept => kept,
                }
            }
            _ => 0,
        };

        let found = hunks(&self.current, merged, anchor, self.algorithm);
        let mut patches = reconcile(&self.current, &found, &self.outstanding);
        if anchor > 0 {
            let first = patches.first().map_or(usize::MAX, |p| p.start);
            patches.extend(
                self.patches
                    .iter()
                    .filter(|p| p.end() < anchor && p.end() < first)
                    .cloned(),
            );
            patches.sort_by_key(|p| (p.start, p.offset));
        }
        self.patches = patches;
    }

    fn emit(&self, kind: TransitionKind) -> Transition {
        let transition = Transition {
            kind,
            outstanding: self.outstanding.len(),
            patches: self.patches.len(),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            state: self.state(),
        };
        debug!(
            %kind,
            outstanding = transition.outstanding,
            patches = transition.patches,
            undo = self.undo_stack.len(),
            redo = self.redo_stack.len(),
            "buffer transition"
        );
        for observer in &self.observers {
            observer(&transition);
        }
        transition
    }
}

/// Number of leading lines `a` and `b` share.
fn common_prefix(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::aggregator::{HeuristicReport, HeuristicResolution, MlCandidate};
    use crate::diff::hunks;
    use crate::parser::parse;
    use crate::reconcile::reconcile;
    use crate::strategy::MlLabel;
    use crate::types::Side;

    const SCENARIO: &str = "a\n<<<<<<<\nx\n=======\ny\n>>>>>>>\nb";

    const TWO_BLOCKS: &str = "head\n<<<<<<< HEAD\nleft1\n=======\nright1\n>>>>>>> topic\nmid\n<<<<<<< HEAD\nleft2\n||||||| base\nbase2\n=======\nright2\n>>>>>>> topic\ntail";

    fn manager(text: &str) -> BufferVersionManager {
        BufferVersionManager::new(text, DiffAlgorithm::Tokens)
    }

    fn merged_report(lines: &[&str]) -> CandidateUpdate {
        CandidateUpdate::Heuristic(HeuristicReport {
            pending: false,
            resolutions: vec![],
            merged: Some(lines.iter().map(|s| s.to_string()).collect()),
            patches_empty: false,
        })
    }

    #[test]
    fn test_scenario_apply_ours() {
        let mut m = manager(SCENARIO);
        assert_eq!(
            m.blocks(),
            &[ConflictBlock {
                our_marker_line: 2,
                base_marker_line: None,
                their_marker_line: 4,
                end_marker_line: 6,
            }]
        );
        let applied = m.apply_resolution(1, ResolutionChoice::Side(Side::Ours)).unwrap();
        assert_eq!(m.current(), &["a", "x", "b"]);
        assert_eq!(applied.transition.outstanding, 0);
        assert_eq!(applied.transition.state, BufferState::Dirty);
        assert_eq!(applied.audit.choice_code, "x");
    }

    #[test]
    fn test_apply_then_undo_restores() {
        let mut m = manager(TWO_BLOCKS);
        let before = m.current().to_vec();
        m.apply_resolution(2, ResolutionChoice::Side(Side::Base)).unwrap();
        assert_eq!(m.outstanding().len(), 1);

        let undone = m.undo().unwrap();
        assert_eq!(m.current(), before.as_slice());
        assert_eq!(undone.outstanding, 2);
        assert_eq!(undone.state, BufferState::Clean);
        assert!(undone.can_redo);
    }

    #[test]
    fn test_undo_redo_undo_equals_undo() {
        let mut a = manager(TWO_BLOCKS);
        a.apply_resolution(1, ResolutionChoice::Side(Side::Theirs)).unwrap();
        a.apply_resolution(2, ResolutionChoice::Side(Side::Ours)).unwrap();
        let mut b = manager(TWO_BLOCKS);
        b.apply_resolution(1, ResolutionChoice::Side(Side::Theirs)).unwrap();
        b.apply_resolution(2, ResolutionChoice::Side(Side::Ours)).unwrap();

        a.undo();
        b.undo();
        b.redo();
        b.undo();
        assert_eq!(a.current(), b.current());
        assert_eq!(a.outstanding(), b.outstanding());
        assert_eq!(a.can_redo(), b.can_redo());
    }

    #[test]
    fn test_empty_stacks_are_noops() {
        let mut m = manager(SCENARIO);
        assert!(m.undo().is_none());
        assert!(m.redo().is_none());
        assert_eq!(m.state(), BufferState::Clean);
    }

    #[test]
    fn test_mutation_clears_redo() {
        let mut m = manager(TWO_BLOCKS);
        m.apply_resolution(1, ResolutionChoice::Side(Side::Ours)).unwrap();
        m.undo();
        assert!(m.can_redo());
        m.apply_resolution(2, ResolutionChoice::Side(Side::Theirs)).unwrap();
        assert!(!m.can_redo());
    }

    #[test]
    fn test_second_block_located_after_first_applied() {
        let mut m = manager(TWO_BLOCKS);
        let request = ApplyRequest {
            block: 2,
            choice: ResolutionChoice::Side(Side::Theirs),
        };
        let before = m.prepare_apply(request).unwrap();
        m.apply_resolution(1, ResolutionChoice::Side(Side::Ours)).unwrap();
        assert!(m.located(&request).is_none());
        let after = m.prepare_apply(request).unwrap();
        assert_eq!(after.start, before.start - 4);
        assert_eq!(after.line_count(), before.line_count());

        m.apply_resolution(2, ResolutionChoice::Side(Side::Theirs)).unwrap();
        assert_eq!(m.current(), &["head", "left1", "mid", "right2", "tail"]);
        assert!(m.outstanding().is_empty());
    }

    #[test]
    fn test_location_not_found_leaves_buffer() {
        let mut m = manager(SCENARIO);
        m.apply_resolution(1, ResolutionChoice::Side(Side::Theirs)).unwrap();
        let snapshot = m.current().to_vec();
        let err = m
            .apply_resolution(1, ResolutionChoice::Side(Side::Ours))
            .unwrap_err();
        assert_eq!(err, ResolveError::LocationNotFound { block: 1 });
        assert_eq!(m.current(), snapshot.as_slice());
        assert_eq!(m.state(), BufferState::Dirty);
    }

    #[test]
    fn test_reset() {
        let mut m = manager(TWO_BLOCKS);
        m.apply_resolution(1, ResolutionChoice::Side(Side::Ours)).unwrap();
        m.apply_resolution(2, ResolutionChoice::Side(Side::Ours)).unwrap();
        m.undo();
        let t = m.reset();
        assert_eq!(m.current(), m.original());
        assert_eq!(t.outstanding, 2);
        assert!(!t.can_undo && !t.can_redo);
    }

    #[test]
    fn test_heuristic_pending_twice_then_empty_merged() {
        let mut m = manager(SCENARIO);
        m.commit(CandidateUpdate::HeuristicStarted);
        for _ in 0..2 {
            m.commit(CandidateUpdate::Heuristic(HeuristicReport {
                pending: true,
                resolutions: vec![],
                merged: None,
                patches_empty: false,
            }));
        }
        let t = m.commit(merged_report(&[]));
        assert!(m.aggregator().no_patches());
        assert_eq!(t.patches, 0);
        assert!(m.patches().is_empty());
    }

    #[test]
    fn test_merged_reference_produces_patch() {
        let mut m = manager(SCENARIO);
        let t = m.commit(merged_report(&["a", "x", "y", "b"]));
        assert_eq!(t.patches, 1);
        assert_eq!(m.initial_patches(), m.patches());
        assert_eq!(m.patches()[0].start, 2);
        assert_eq!(m.patches()[0].offset, 5);

        let applied = m.apply_resolution(1, ResolutionChoice::SemanticPatch(0)).unwrap();
        assert_eq!(m.current(), &["a", "x", "y", "b"]);
        assert_eq!(applied.audit.choice, "sa");
        assert_eq!(applied.transition.patches, 0);
        assert_eq!(applied.transition.outstanding, 0);

        m.undo();
        assert_eq!(m.patches().len(), 1);
    }

    #[test]
    fn test_side_audit_after_merged() {
        let mut m = manager(SCENARIO);
        m.commit(merged_report(&["a", "x", "y", "b"]));
        m.commit(CandidateUpdate::Ml {
            block: 1,
            candidate: MlCandidate {
                label: MlLabel::ConcatBoth,
                confidence: 0.8,
                content: "x\ny".into(),
            },
        });
        let applied = m.apply_resolution(1, ResolutionChoice::Side(Side::Ours)).unwrap();
        assert_eq!(applied.audit.sa_code, "x\ny");
        assert_eq!(applied.audit.ml_code, "x\ny");
        assert_eq!(applied.audit.dl_code, "");
    }

    #[test]
    fn test_heuristic_choice_multiline() {
        let mut m = manager(SCENARIO);
        m.commit(CandidateUpdate::Heuristic(HeuristicReport {
            pending: false,
            resolutions: vec![HeuristicResolution {
                index: 1,
                desc: "union".into(),
                confidence: 0.9,
                label: "union".into(),
                content: "x\ny".into(),
            }],
            merged: None,
            patches_empty: false,
        }));
        m.apply_resolution(1, ResolutionChoice::Heuristic).unwrap();
        assert_eq!(m.current(), &["a", "x", "y", "b"]);
    }

    #[test]
    fn test_edit_records_version() {
        let mut m = manager(SCENARIO);
        assert!(m.edit(SCENARIO, 1).is_none());
        let t = m.edit("a\nmanual\nb", 2).unwrap();
        assert_eq!(t.kind, TransitionKind::Edit);
        assert_eq!(t.outstanding, 0);
        m.undo();
        assert_eq!(m.content(), SCENARIO);
    }

    #[test]
    fn test_outstanding_matches_fresh_parse() {
        let mut m = manager(TWO_BLOCKS);
        m.apply_resolution(2, ResolutionChoice::Side(Side::Ours)).unwrap();
        assert_eq!(m.outstanding(), parse(m.current()).as_slice());
        m.undo();
        assert_eq!(m.outstanding(), parse(m.current()).as_slice());
        m.redo();
        assert_eq!(m.outstanding(), parse(m.current()).as_slice());
    }

    #[test]
    fn test_observers_notified() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut m = manager(SCENARIO);
        let counter = seen.clone();
        m.subscribe(move |t| {
            assert!(t.outstanding <= 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        m.apply_resolution(1, ResolutionChoice::Side(Side::Ours)).unwrap();
        m.undo();
        m.redo();
        m.reset();
        assert!(m.apply_resolution(1, ResolutionChoice::Ml).is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    fn fresh_patches(m: &BufferVersionManager) -> Vec<SemanticPatch> {
        let merged = m.aggregator().merged().unwrap();
        let found = hunks(m.current(), merged, 0, m.algorithm());
        reconcile(m.current(), &found, m.outstanding())
    }

    #[test]
    fn test_later_block_first_keeps_earlier_patch() {
        let mut m = manager(TWO_BLOCKS);
        m.commit(merged_report(&["head", "M1", "mid", "M2", "tail"]));
        assert_eq!(m.patches().len(), 2);

        let applied = m.apply_resolution(2, ResolutionChoice::Side(Side::Ours)).unwrap();
        assert_eq!(applied.transition.outstanding, 1);
        assert_eq!(m.patches(), fresh_patches(&m).as_slice());
        assert_eq!(m.patches()[0].start, 2);
        assert_eq!(m.patches()[0].new_lines, vec!["M1"]);

        m.apply_resolution(1, ResolutionChoice::SemanticPatch(0)).unwrap();
        assert_eq!(m.current(), &["head", "M1", "mid", "left2", "tail"]);
    }

    #[test]
    fn test_edit_above_anchor_rediffs_prefix() {
        let mut m = manager(TWO_BLOCKS);
        m.commit(merged_report(&["head", "M1", "mid", "M2", "tail"]));
        let edited = TWO_BLOCKS.replacen("head", "HEAD", 1);
        m.edit(&edited, 9).unwrap();
        assert_eq!(m.patches(), fresh_patches(&m).as_slice());
    }

    #[test]
    fn test_patch_for_other_block_rejected() {
        let mut m = manager(TWO_BLOCKS);
        m.commit(merged_report(&["head", "M1", "mid", "M2", "tail"]));
        let snapshot = m.current().to_vec();
        let err = m
            .apply_resolution(2, ResolutionChoice::SemanticPatch(0))
            .unwrap_err();
        assert_eq!(err, ResolveError::PatchOutOfRange { index: 0 });
        assert_eq!(m.current(), snapshot.as_slice());
        assert_eq!(m.state(), BufferState::Clean);
    }
}
