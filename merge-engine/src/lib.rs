//! # merge-engine
//!
//! The synchronous core of mergebot: everything that happens to a conflicted
//! file between loading it and writing it back, with no I/O.
//!
//! ## Pipeline
//!
//! 1. **Parsing** ([`parser`]): find `<<<<<<<` / `|||||||` / `=======` /
//!    `>>>>>>>` blocks in document order.
//! 2. **Fingerprints** ([`fingerprint`]): hash every block at load time so it
//!    can be found again after the buffer has been edited around it.
//! 3. **Diffing** ([`diff`]): line diff between the buffer and the heuristic
//!    engine's merged reference, coalesced into hunks.
//! 4. **Reconciliation** ([`reconcile`]): widen the hunks touching a block into
//!    one semantic patch per block.
//! 5. **Aggregation** ([`aggregator`], [`strategy`]): candidate resolutions from
//!    the heuristic, classifier, edit-script and history engines.
//! 6. **Versioning** ([`buffer`]): apply/undo/redo/reset over the live buffer.
//!
//! ## Example
//!
//! ```rust
//! use merge_engine::{BufferVersionManager, DiffAlgorithm, ResolutionChoice, Side};
//!
//! let text = "a\n<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> topic\nb";
//! let mut manager = BufferVersionManager::new(text, DiffAlgorithm::Tokens);
//! assert_eq!(manager.blocks().len(), 1);
//!
//! let applied = manager
//!     .apply_resolution(1, ResolutionChoice::Side(Side::Ours))
//!     .unwrap();
//! assert_eq!(manager.content(), "a\nx\nb");
//! assert_eq!(applied.transition.outstanding, 0);
//! ```

pub mod aggregator;
pub mod buffer;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod parser;
pub mod reconcile;
pub mod strategy;
pub mod types;

// Re-export primary public API
pub use aggregator::{
    CandidateUpdate, ChoiceAudit, DlOutcome, HeuristicReport, HeuristicResolution,
    HeuristicStatus, HistoryCandidate, MlCandidate, ResolutionAggregator,
};
pub use buffer::{Applied, ApplyRequest, BufferState, BufferVersionManager, Transition, TransitionKind};
pub use diff::{DiffAlgorithm, split_lines};
pub use error::ResolveError;
pub use fingerprint::{Fingerprint, FingerprintIndex};
pub use parser::parse;
pub use strategy::{CombineInput, LabelOutcome, MlLabel};
pub use types::{
    BlockSides, ConflictBlock, DiffHunk, Interval, ResolutionCandidate, ResolutionChoice,
    SemanticPatch, Side, Source,
};
