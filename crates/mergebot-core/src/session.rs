use crate::message::{ChoiceRecord, FileContext, Notice};
use merge_engine::{
    BufferState, BufferVersionManager, ChoiceAudit, ConflictBlock, DiffAlgorithm, HeuristicStatus,
    Interval, ResolutionCandidate, SemanticPatch,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// One conflicted file being resolved.
#[derive(Debug)]
pub struct ResolutionSession {
    pub id: Uuid,
    pub file: FileContext,
    pub manager: BufferVersionManager,
    pub notices: Vec<Notice>,
    pub created_at: u64,
}

/// Collectors and request handlers all write through this lock.
pub type SharedSession = Arc<tokio::sync::Mutex<ResolutionSession>>;

impl ResolutionSession {
    pub fn new(file: FileContext, content: &str, algorithm: DiffAlgorithm) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            manager: BufferVersionManager::new(content, algorithm),
            notices: Vec::new(),
            created_at: now_millis(),
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn choice_record(&self, block: usize, audit: ChoiceAudit) -> ChoiceRecord {
        self.file.choice_record(block, audit)
    }

    pub fn push_notice(&mut self, notice: Notice) {
        tracing::warn!(session = %self.id, "{}", notice);
        self.notices.push(notice);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let manager = &self.manager;
        let current = manager.current();
        let blocks = manager
            .blocks()
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let index = i + 1;
                BlockView {
                    index,
                    block: *block,
                    fingerprint: manager
                        .fingerprints()
                        .get(index)
                        .map(|fp| fp.to_hex())
                        .unwrap_or_default(),
                    located: manager.fingerprints().locate(current, index),
                    candidates: manager.aggregator().candidates(index),
                }
            })
            .collect();

        SessionSnapshot {
            id: self.id,
            file: self.file.clone(),
            content: manager.content(),
            blocks,
            outstanding: manager.outstanding().to_vec(),
            patches: manager.patches().to_vec(),
            can_undo: manager.can_undo(),
            can_redo: manager.can_redo(),
            state: manager.state(),
            heuristic_status: manager.aggregator().heuristic_status(),
            no_patches: manager.aggregator().no_patches(),
            dl_pending: manager.aggregator().dl_pending(),
            dl_batch: manager.aggregator().dl_batch(),
            notices: self.notices.clone(),
            created_at: self.created_at,
        }
    }
}

/// A block as loaded, with where it sits now (if still unresolved).
#[derive(Debug, Clone, Serialize)]
pub struct BlockView {
    pub index: usize,
    pub block: ConflictBlock,
    pub fingerprint: String,
    pub located: Option<Interval>,
    pub candidates: Vec<ResolutionCandidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub file: FileContext,
    pub content: String,
    pub blocks: Vec<BlockView>,
    pub outstanding: Vec<ConflictBlock>,
    pub patches: Vec<SemanticPatch>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub state: BufferState,
    pub heuristic_status: HeuristicStatus,
    pub no_patches: bool,
    pub dl_pending: bool,
    /// Batch id that pushed DL results must carry.
    pub dl_batch: u64,
    pub notices: Vec<Notice>,
    pub created_at: u64,
}

/// Get current time as milliseconds since epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
