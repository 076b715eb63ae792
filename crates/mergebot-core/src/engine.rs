use crate::message::{
    ChoiceRecord, ClassifierPrediction, ClassifierRequest, CombineRequest, EditScriptRequest,
    HeuristicRequest, HistoryQuery, HistoryRecord,
};
use merge_engine::{DlOutcome, HeuristicReport};

/// Static-analysis engine. Answers may be `pending`; callers poll.
#[async_trait::async_trait]
pub trait HeuristicEngine: Send + Sync + 'static {
    async fn resolve(&self, request: &HeuristicRequest) -> anyhow::Result<HeuristicReport>;
}

/// Predicts a strategy label per conflict block of a file.
#[async_trait::async_trait]
pub trait ClassifierEngine: Send + Sync + 'static {
    async fn predict(&self, request: &ClassifierRequest) -> anyhow::Result<Vec<ClassifierPrediction>>;
}

/// Produces a combined version for blocks labelled `CB`.
#[async_trait::async_trait]
pub trait CombinerEngine: Send + Sync + 'static {
    async fn combine(&self, request: &CombineRequest) -> anyhow::Result<String>;
}

/// Edit-script predictor, one request per block.
#[async_trait::async_trait]
pub trait EditScriptEngine: Send + Sync + 'static {
    async fn predict(&self, request: &EditScriptRequest) -> anyhow::Result<DlOutcome>;
}

/// Resolutions mined from the repository history, one record per block.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync + 'static {
    async fn history(&self, query: &HistoryQuery) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// Write-only store for applied choices.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn record(&self, record: &ChoiceRecord) -> anyhow::Result<()>;
}
