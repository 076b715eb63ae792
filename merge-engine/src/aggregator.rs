//! Per-block resolution candidates from the four engines.
//!
//! Every source is committed independently through [`CandidateUpdate`]; a
//! late, failed or missing source never blocks the others.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::split_lines;
use crate::error::{ResolveError, Result};
use crate::strategy::MlLabel;
use crate::types::{
    ConflictBlock, ResolutionCandidate, ResolutionChoice, SemanticPatch, Side, Source,
    to_owned_lines,
};

/// Most history candidates kept per block.
pub const HISTORY_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicStatus {
    #[default]
    Idle,
    Pending,
    Ready,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicResolution {
    /// 1-based block index.
    pub index: usize,
    pub desc: String,
    pub confidence: f64,
    pub label: String,
    pub content: String,
}

/// One response of the heuristic engine, already unwrapped from the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicReport {
    pub pending: bool,
    pub resolutions: Vec<HeuristicResolution>,
    pub merged: Option<Vec<String>>,
    /// The engine answered with an explicitly empty patch list.
    #[serde(default)]
    pub patches_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlCandidate {
    pub label: MlLabel,
    pub confidence: f64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlOutcome {
    Resolvable(String),
    Unresolvable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryCandidate {
    pub content: String,
    pub confidence: f64,
}

/// The only way results enter the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateUpdate {
    HeuristicStarted,
    Heuristic(HeuristicReport),
    HeuristicTimedOut,
    HeuristicFailed,
    MlCleared,
    Ml { block: usize, candidate: MlCandidate },
    /// Opens DL batch `batch`. Results tagged with any other batch are dropped.
    DlStarted { batch: u64 },
    Dl { batch: u64, block: usize, outcome: DlOutcome },
    DlFinished { batch: u64 },
    History { block: usize, candidates: Vec<HistoryCandidate> },
}

impl CandidateUpdate {
    pub fn source(&self) -> Source {
        match self {
            CandidateUpdate::HeuristicStarted
            | CandidateUpdate::Heuristic(_)
            | CandidateUpdate::HeuristicTimedOut
            | CandidateUpdate::HeuristicFailed => Source::Heuristic,
            CandidateUpdate::MlCleared | CandidateUpdate::Ml { .. } => Source::Ml,
            CandidateUpdate::DlStarted { .. }
            | CandidateUpdate::Dl { .. }
            | CandidateUpdate::DlFinished { .. } => Source::Dl,
            CandidateUpdate::History { .. } => Source::History,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitEffect {
    /// The merged reference appeared, changed or went away.
    pub merged_changed: bool,
}

/// Audit fields recorded for every applied choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceAudit {
    pub choice: String,
    pub choice_code: String,
    pub sa_code: String,
    pub ml_code: String,
    pub dl_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChoice {
    pub content: String,
    /// Lines spliced into the buffer in place of the block.
    pub lines: Vec<String>,
    pub audit: ChoiceAudit,
}

/// Buffer state a lookup needs besides the candidates themselves.
pub struct ResolveContext<'a> {
    pub original: &'a [String],
    pub blocks: &'a [ConflictBlock],
    pub patches: &'a [SemanticPatch],
    pub initial_patches: &'a [SemanticPatch],
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionAggregator {
    heuristic_status: HeuristicStatus,
    heuristic: BTreeMap<usize, Vec<HeuristicResolution>>,
    merged: Option<Vec<String>>,
    no_patches: bool,
    ml: BTreeMap<usize, MlCandidate>,
    dl_pending: bool,
    dl_batch: u64,
    dl: BTreeMap<usize, DlOutcome>,
    history: BTreeMap<usize, Vec<HistoryCandidate>>,
}

impl ResolutionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, update: CandidateUpdate) -> CommitEffect {
        let mut effect = CommitEffect::default();
        match update {
            CandidateUpdate::HeuristicStarted => {
                effect.merged_changed = self.clear_heuristic();
                self.heuristic_status = HeuristicStatus::Pending;
            }
            CandidateUpdate::Heuristic(report) => {
                self.heuristic.clear();
                for resolution in report.resolutions {
                    self.heuristic
                        .entry(resolution.index)
                        .or_default()
                        .push(resolution);
                }
                for list in self.heuristic.values_mut() {
                    list.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                }

                if report.pending {
                    self.heuristic_status = HeuristicStatus::Pending;
                } else {
                    self.heuristic_status = HeuristicStatus::Ready;
                    let merged = report
                        .merged
                        .filter(|m| !m.is_empty() && !report.patches_empty);
                    self.no_patches = merged.is_none();
                    effect.merged_changed = self.merged != merged;
                    self.merged = merged;
                }
            }
            CandidateUpdate::HeuristicTimedOut => {
                self.heuristic_status = HeuristicStatus::TimedOut;
            }
            CandidateUpdate::HeuristicFailed => {
                effect.merged_changed = self.clear_heuristic();
                self.heuristic_status = HeuristicStatus::Failed;
            }
            CandidateUpdate::MlCleared => self.ml.clear(),
            CandidateUpdate::Ml { block, candidate } => {
                self.ml.insert(block, candidate);
            }
            CandidateUpdate::DlStarted { batch } => {
                self.dl.clear();
                self.dl_pending = true;
                self.dl_batch = batch;
            }
            CandidateUpdate::Dl { batch, .. } | CandidateUpdate::DlFinished { batch }
                if batch != self.dl_batch =>
            {
                debug!(batch, current = self.dl_batch, "dropped stale DL update");
            }
            CandidateUpdate::Dl { block, outcome, .. } => {
                let outcome = match outcome {
                    DlOutcome::Resolvable(mut text) => {
                        if text.ends_with('\n') {
                            text.pop();
                        }
                        DlOutcome::Resolvable(text)
                    }
                    DlOutcome::Unresolvable => DlOutcome::Unresolvable,
                };
                self.dl.insert(block, outcome);
            }
            CandidateUpdate::DlFinished { .. } => self.dl_pending = false,
            CandidateUpdate::History { block, mut candidates } => {
                candidates.truncate(HISTORY_DEPTH);
                candidates.retain(|c| c.confidence > 0.0 && !c.content.is_empty());
                candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                self.history.insert(block, candidates);
            }
        }
        effect
    }

    /// Drop everything the heuristic source contributed. Returns whether a
    /// merged reference was discarded.
    fn clear_heuristic(&mut self) -> bool {
        self.heuristic.clear();
        self.no_patches = false;
        self.heuristic_status = HeuristicStatus::Idle;
        self.merged.take().is_some()
    }

    pub fn heuristic_status(&self) -> HeuristicStatus {
        self.heuristic_status
    }

    /// Reference merge to diff against, once the heuristic engine is done.
    pub fn merged(&self) -> Option<&[String]> {
        self.merged.as_deref()
    }

    pub fn no_patches(&self) -> bool {
        self.no_patches
    }

    pub fn dl_pending(&self) -> bool {
        self.dl_pending
    }

    /// Id of the latest DL batch, 0 before the first one.
    pub fn dl_batch(&self) -> u64 {
        self.dl_batch
    }

    pub fn best_heuristic(&self, block: usize) -> Option<&HeuristicResolution> {
        self.heuristic.get(&block).and_then(|list| list.first())
    }

    pub fn ml(&self, block: usize) -> Option<&MlCandidate> {
        self.ml.get(&block)
    }

    pub fn dl(&self, block: usize) -> Option<&DlOutcome> {
        self.dl.get(&block)
    }

    pub fn history(&self, block: usize) -> &[HistoryCandidate] {
        self.history.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every candidate for the 1-based `block`, grouped by source.
    pub fn candidates(&self, block: usize) -> Vec<ResolutionCandidate> {
        let mut out = Vec::new();
        for resolution in self.heuristic.get(&block).into_iter().flatten() {
            out.push(ResolutionCandidate {
                source: Source::Heuristic,
                block_index: block,
                content: resolution.content.clone(),
                confidence: Some(resolution.confidence),
                label: Some(resolution.label.clone()),
                resolvable: None,
            });
        }
        if let Some(ml) = self.ml.get(&block) {
            out.push(ResolutionCandidate {
                source: Source::Ml,
                block_index: block,
                content: ml.content.clone(),
                confidence: Some(ml.confidence),
                label: Some(ml.label.code().to_string()),
                resolvable: None,
            });
        }
        if !self.dl_pending {
            if let Some(dl) = self.dl.get(&block) {
                let (content, resolvable) = match dl {
                    DlOutcome::Resolvable(text) => (text.clone(), true),
                    DlOutcome::Unresolvable => (String::new(), false),
                };
                out.push(ResolutionCandidate {
                    source: Source::Dl,
                    block_index: block,
                    content,
                    confidence: None,
                    label: None,
                    resolvable: Some(resolvable),
                });
            }
        }
        for candidate in self.history(block) {
            out.push(ResolutionCandidate {
                source: Source::History,
                block_index: block,
                content: candidate.content.clone(),
                confidence: Some(candidate.confidence),
                label: None,
                resolvable: None,
            });
        }
        out
    }

    /// Content for `choice` on the 1-based `block`, with its audit record.
    pub fn resolve(
        &self,
        block: usize,
        choice: ResolutionChoice,
        ctx: &ResolveContext<'_>,
    ) -> Result<ResolvedChoice> {
        let conflict = block
            .checked_sub(1)
            .and_then(|i| ctx.blocks.get(i))
            .ok_or(ResolveError::BlockOutOfRange {
                block,
                count: ctx.blocks.len(),
            })?;

        let mut audit = ChoiceAudit {
            choice: choice.audit_label().to_string(),
            ..Default::default()
        };

        let (content, lines) = match choice {
            ResolutionChoice::Side(side) => {
                let slice = match side {
                    Side::Ours => conflict.ours(ctx.original),
                    Side::Theirs => conflict.theirs(ctx.original),
                    Side::Base => conflict
                        .base(ctx.original)
                        .ok_or(ResolveError::NoBaseVersion { block })?,
                };
                let lines = to_owned_lines(slice);

                audit.sa_code = self.side_sa_code(block, conflict, ctx);
                audit.ml_code = self.ml(block).map(|m| m.content.clone()).unwrap_or_default();
                audit.dl_code = self.dl_code(block).unwrap_or_default();
                (lines.join("\n"), lines)
            }
            ResolutionChoice::Heuristic => {
                let best = self.best_heuristic(block).ok_or(ResolveError::MissingResolution {
                    origin: Source::Heuristic,
                    block,
                })?;
                audit.sa_code = best.content.clone();
                text_choice(best.content.clone())
            }
            ResolutionChoice::SemanticPatch(index) => {
                let patch = ctx
                    .patches
                    .get(index)
                    .ok_or(ResolveError::PatchOutOfRange { index })?;
                audit.sa_code = patch.new_content();
                (patch.new_content(), patch.new_lines.clone())
            }
            ResolutionChoice::Ml => {
                let ml = self.ml(block).ok_or(ResolveError::MissingResolution {
                    origin: Source::Ml,
                    block,
                })?;
                audit.ml_code = ml.content.clone();
                text_choice(ml.content.clone())
            }
            ResolutionChoice::Dl => {
                if self.dl_pending {
                    return Err(ResolveError::ResolutionPending { origin: Source::Dl });
                }
                match self.dl(block) {
                    Some(DlOutcome::Resolvable(text)) => {
                        audit.dl_code = text.clone();
                        text_choice(text.clone())
                    }
                    Some(DlOutcome::Unresolvable) => {
                        return Err(ResolveError::Unresolvable {
                            origin: Source::Dl,
                            block,
                        });
                    }
                    None => {
                        return Err(ResolveError::MissingResolution {
                            origin: Source::Dl,
                            block,
                        });
                    }
                }
            }
            ResolutionChoice::History { rank } => {
                let candidate =
                    self.history(block)
                        .get(rank)
                        .ok_or(ResolveError::MissingResolution {
                            origin: Source::History,
                            block,
                        })?;
                text_choice(candidate.content.clone())
            }
        };

        audit.choice_code = content.clone();
        debug!(block, %choice, "resolved choice");
        Ok(ResolvedChoice {
            content,
            lines,
            audit,
        })
    }

    /// The initial patch overlapping the block the most, or failing that the
    /// block's best heuristic resolution.
    fn side_sa_code(&self, block: usize, conflict: &ConflictBlock, ctx: &ResolveContext<'_>) -> String {
        let mut best: Option<(&SemanticPatch, usize)> = None;
        for patch in ctx.initial_patches {
            let overlap = conflict.overlap(patch.start, patch.end());
            if overlap > 0 && best.is_none_or(|(_, o)| overlap > o) {
                best = Some((patch, overlap));
            }
        }
        match best {
            Some((patch, _)) => patch.new_content(),
            None => self
                .best_heuristic(block)
                .map(|h| h.content.clone())
                .unwrap_or_default(),
        }
    }

    fn dl_code(&self, block: usize) -> Option<String> {
        if self.dl_pending {
            return None;
        }
        match self.dl(block)? {
            DlOutcome::Resolvable(text) => Some(text.clone()),
            DlOutcome::Unresolvable => None,
        }
    }
}

fn text_choice(content: String) -> (String, Vec<String>) {
    let lines = split_lines(&content);
    (content, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn buffer() -> Vec<String> {
        ["a", "<<<<<<<", "x", "=======", "y", ">>>>>>>", "b"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn heuristic(index: usize, confidence: f64, content: &str) -> HeuristicResolution {
        HeuristicResolution {
            index,
            desc: String::new(),
            confidence,
            label: "rule".into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_pending_then_empty_merged_means_no_patches() {
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::HeuristicStarted);
        for _ in 0..2 {
            agg.commit(CandidateUpdate::Heuristic(HeuristicReport {
                pending: true,
                resolutions: vec![heuristic(1, 0.4, "x")],
                ..Default::default()
            }));
            assert_eq!(agg.heuristic_status(), HeuristicStatus::Pending);
            assert_eq!(agg.best_heuristic(1).unwrap().content, "x");
        }
        let effect = agg.commit(CandidateUpdate::Heuristic(HeuristicReport {
            pending: false,
            resolutions: vec![heuristic(1, 0.4, "x")],
            merged: Some(vec![]),
            patches_empty: false,
        }));
        assert!(!effect.merged_changed);
        assert!(agg.no_patches());
        assert!(agg.merged().is_none());
        assert_eq!(agg.heuristic_status(), HeuristicStatus::Ready);
    }

    #[test]
    fn test_empty_patch_list_suppresses_merged() {
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::Heuristic(HeuristicReport {
            pending: false,
            resolutions: vec![],
            merged: Some(vec!["a".into()]),
            patches_empty: true,
        }));
        assert!(agg.no_patches());
        assert!(agg.merged().is_none());
    }

    #[test]
    fn test_failure_resets_only_heuristic() {
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::Heuristic(HeuristicReport {
            pending: false,
            resolutions: vec![heuristic(1, 0.9, "x")],
            merged: Some(vec!["a".into()]),
            patches_empty: false,
        }));
        agg.commit(CandidateUpdate::Ml {
            block: 1,
            candidate: MlCandidate {
                label: MlLabel::PickLeft,
                confidence: 0.7,
                content: "x".into(),
            },
        });
        let effect = agg.commit(CandidateUpdate::HeuristicFailed);
        assert!(effect.merged_changed);
        assert_eq!(agg.heuristic_status(), HeuristicStatus::Failed);
        assert!(agg.best_heuristic(1).is_none());
        assert!(agg.ml(1).is_some());
    }

    #[test]
    fn test_timeout_keeps_partial() {
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::Heuristic(HeuristicReport {
            pending: true,
            resolutions: vec![heuristic(2, 0.5, "p")],
            ..Default::default()
        }));
        agg.commit(CandidateUpdate::HeuristicTimedOut);
        assert_eq!(agg.heuristic_status(), HeuristicStatus::TimedOut);
        assert_eq!(agg.candidates(2).len(), 1);
    }

    #[test]
    fn test_history_filtered_and_ranked() {
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::History {
            block: 1,
            candidates: vec![
                HistoryCandidate { content: "low".into(), confidence: 0.2 },
                HistoryCandidate { content: "high".into(), confidence: 0.8 },
                HistoryCandidate { content: "third".into(), confidence: 0.99 },
            ],
        });
        let ranked: Vec<&str> = agg.history(1).iter().map(|c| c.content.as_str()).collect();
        assert_eq!(ranked, vec!["high", "low"]);

        agg.commit(CandidateUpdate::History {
            block: 2,
            candidates: vec![
                HistoryCandidate { content: "zero".into(), confidence: 0.0 },
                HistoryCandidate { content: String::new(), confidence: 0.5 },
            ],
        });
        assert!(agg.history(2).is_empty());
    }

    #[test]
    fn test_dl_pending_and_trailing_newline() {
        let original = buffer();
        let blocks = parse(&original);
        let ctx = ResolveContext {
            original: &original,
            blocks: &blocks,
            patches: &[],
            initial_patches: &[],
        };
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::DlStarted { batch: 1 });
        agg.commit(CandidateUpdate::Dl {
            batch: 1,
            block: 1,
            outcome: DlOutcome::Resolvable("x\ny\n".into()),
        });
        assert_eq!(
            agg.resolve(1, ResolutionChoice::Dl, &ctx),
            Err(ResolveError::ResolutionPending { origin: Source::Dl })
        );
        agg.commit(CandidateUpdate::DlFinished { batch: 1 });
        let resolved = agg.resolve(1, ResolutionChoice::Dl, &ctx).unwrap();
        assert_eq!(resolved.content, "x\ny");
        assert_eq!(resolved.lines, vec!["x", "y"]);
        assert_eq!(resolved.audit.dl_code, "x\ny");

        agg.commit(CandidateUpdate::Dl {
            batch: 1,
            block: 1,
            outcome: DlOutcome::Unresolvable,
        });
        assert!(matches!(
            agg.resolve(1, ResolutionChoice::Dl, &ctx),
            Err(ResolveError::Unresolvable { block: 1, .. })
        ));
    }

    #[test]
    fn test_stale_dl_batch_ignored() {
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::DlStarted { batch: 1 });
        agg.commit(CandidateUpdate::DlStarted { batch: 2 });
        agg.commit(CandidateUpdate::Dl {
            batch: 1,
            block: 1,
            outcome: DlOutcome::Unresolvable,
        });
        agg.commit(CandidateUpdate::DlFinished { batch: 1 });
        assert!(agg.dl_pending());
        assert_eq!(agg.dl_batch(), 2);
        assert!(agg.dl(1).is_none());

        agg.commit(CandidateUpdate::DlFinished { batch: 2 });
        assert!(!agg.dl_pending());
    }

    #[test]
    fn test_side_choice_audit_uses_initial_patch() {
        let original = buffer();
        let blocks = parse(&original);
        let initial = vec![
            SemanticPatch { start: 1, offset: 1, new_lines: vec!["A".into()] },
            SemanticPatch { start: 2, offset: 5, new_lines: vec!["x".into(), "y".into()] },
        ];
        let ctx = ResolveContext {
            original: &original,
            blocks: &blocks,
            patches: &[],
            initial_patches: &initial,
        };
        let mut agg = ResolutionAggregator::new();
        agg.commit(CandidateUpdate::Heuristic(HeuristicReport {
            pending: false,
            resolutions: vec![heuristic(1, 0.9, "from-engine")],
            merged: None,
            patches_empty: false,
        }));
        let resolved = agg
            .resolve(1, ResolutionChoice::Side(Side::Theirs), &ctx)
            .unwrap();
        assert_eq!(resolved.lines, vec!["y"]);
        assert_eq!(resolved.audit.choice, "theirs");
        assert_eq!(resolved.audit.choice_code, "y");
        assert_eq!(resolved.audit.sa_code, "x\ny");

        let without_patches = ResolveContext { initial_patches: &[], ..ctx };
        let resolved = agg
            .resolve(1, ResolutionChoice::Side(Side::Ours), &without_patches)
            .unwrap();
        assert_eq!(resolved.audit.sa_code, "from-engine");
    }

    #[test]
    fn test_missing_and_out_of_range() {
        let original = buffer();
        let blocks = parse(&original);
        let ctx = ResolveContext {
            original: &original,
            blocks: &blocks,
            patches: &[],
            initial_patches: &[],
        };
        let agg = ResolutionAggregator::new();
        assert_eq!(
            agg.resolve(1, ResolutionChoice::Ml, &ctx),
            Err(ResolveError::MissingResolution { origin: Source::Ml, block: 1 })
        );
        assert_eq!(
            agg.resolve(1, ResolutionChoice::Side(Side::Base), &ctx),
            Err(ResolveError::NoBaseVersion { block: 1 })
        );
        assert_eq!(
            agg.resolve(2, ResolutionChoice::Heuristic, &ctx),
            Err(ResolveError::BlockOutOfRange { block: 2, count: 1 })
        );
        assert_eq!(
            agg.resolve(1, ResolutionChoice::SemanticPatch(0), &ctx),
            Err(ResolveError::PatchOutOfRange { index: 0 })
        );
    }

    #[test]
    fn test_patch_choice_audited_as_heuristic() {
        let original = buffer();
        let blocks = parse(&original);
        let patches = vec![SemanticPatch { start: 2, offset: 5, new_lines: vec!["x".into()] }];
        let ctx = ResolveContext {
            original: &original,
            blocks: &blocks,
            patches: &patches,
            initial_patches: &[],
        };
        let resolved = ResolutionAggregator::new()
            .resolve(1, ResolutionChoice::SemanticPatch(0), &ctx)
            .unwrap();
        assert_eq!(resolved.audit.choice, "sa");
        assert_eq!(resolved.audit.sa_code, "x");
        assert_eq!(resolved.audit.choice_code, "x");
    }

    #[test]
    fn test_update_serde_shape() {
        let update: CandidateUpdate = serde_json::from_str(
            r#"{"kind":"ml","block":1,"candidate":{"label":"CC","confidence":0.5,"content":"a\nb"}}"#,
        )
        .unwrap();
        assert_eq!(update.source(), Source::Ml);
    }
}
