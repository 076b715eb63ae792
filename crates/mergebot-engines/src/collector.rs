//! Background tasks that ask the engines for candidates and commit each
//! answer into the session as it lands.

use crate::error::EngineError;
use crate::registry::EngineSet;
use merge_engine::{
    BlockSides, CandidateUpdate, HeuristicStatus, LabelOutcome, MlCandidate, MlLabel, Source,
};
use mergebot_core::config::PollingSettings;
use mergebot_core::message::{ChoiceRecord, EditScriptRequest, Notice};
use mergebot_core::{
    AuditSink, ClassifierEngine, CombinerEngine, EditScriptEngine, HeuristicEngine, HistorySource,
    SharedSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// How often and how long to poll a heuristic engine that answers `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            interval: Duration::from_secs(5),
        }
    }
}

impl From<&PollingSettings> for PollPolicy {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            interval: settings.interval(),
        }
    }
}

/// Poll the heuristic engine until it stops answering `pending`.
///
/// Every response is committed, pending or not, so partial resolutions show
/// up early. Running out of attempts keeps the last partial result and marks
/// the source timed out. An engine error resets the heuristic source.
/// Cancellation stops the loop and leaves whatever was last committed.
pub async fn poll_heuristic(
    engine: &dyn HeuristicEngine,
    session: &SharedSession,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<HeuristicStatus, EngineError> {
    let request = {
        let mut guard = session.lock().await;
        guard.manager.commit(CandidateUpdate::HeuristicStarted);
        guard.file.heuristic_request()
    };

    for attempt in 1..=policy.max_attempts {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = engine.resolve(&request) => result,
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Heuristic engine failed");
                session
                    .lock()
                    .await
                    .manager
                    .commit(CandidateUpdate::HeuristicFailed);
                return Err(EngineError::Engine(e));
            }
        };

        let pending = report.pending;
        session
            .lock()
            .await
            .manager
            .commit(CandidateUpdate::Heuristic(report));
        if !pending {
            tracing::info!(attempt, "Heuristic result ready");
            return Ok(HeuristicStatus::Ready);
        }
        tracing::debug!(attempt, "Heuristic result pending");

        if attempt < policy.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    session
        .lock()
        .await
        .manager
        .commit(CandidateUpdate::HeuristicTimedOut);
    Err(EngineError::Timeout {
        attempts: policy.max_attempts,
    })
}

/// Classify every block and turn each label into a candidate.
///
/// Returns the number of blocks that received a candidate. Blocks whose label
/// is unknown or whose combiner call fails get a notice instead.
pub async fn collect_ml(
    classifier: Arc<dyn ClassifierEngine>,
    combiner: Option<Arc<dyn CombinerEngine>>,
    session: &SharedSession,
    cancel: &CancellationToken,
) -> Result<usize, EngineError> {
    let request = session.lock().await.file.classifier_request();
    let predictions = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        result = classifier.predict(&request) => result?,
    };
    session.lock().await.manager.commit(CandidateUpdate::MlCleared);

    let mut tasks = JoinSet::new();
    for prediction in predictions {
        let block = prediction.index + 1;
        let label: MlLabel = match prediction.label.parse() {
            Ok(label) => label,
            Err(e) => {
                notify(session, Notice::warning(Source::Ml, format!("block {}: {}", block, e))).await;
                continue;
            }
        };
        let sides = session.lock().await.manager.block_sides(block);
        let sides = match sides {
            Ok(sides) => sides,
            Err(e) => {
                notify(session, Notice::warning(Source::Ml, e.to_string())).await;
                continue;
            }
        };
        let combiner = combiner.clone();
        let confidence = prediction.confidence;
        tasks.spawn(async move {
            let candidate = ml_candidate(label, confidence, &sides, combiner).await;
            (block, candidate)
        });
    }

    let mut committed = 0;
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(EngineError::Cancelled);
            }
            joined = tasks.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        match joined {
            Ok((block, Ok(candidate))) => {
                session
                    .lock()
                    .await
                    .manager
                    .commit(CandidateUpdate::Ml { block, candidate });
                committed += 1;
            }
            Ok((block, Err(e))) => {
                notify(session, Notice::warning(Source::Ml, format!("block {}: {:#}", block, e))).await;
            }
            Err(e) => tracing::error!(error = %e, "ML task panicked"),
        }
    }
    Ok(committed)
}

async fn ml_candidate(
    label: MlLabel,
    confidence: f64,
    sides: &BlockSides,
    combiner: Option<Arc<dyn CombinerEngine>>,
) -> anyhow::Result<MlCandidate> {
    let content = match label.apply(sides) {
        LabelOutcome::Resolved(content) => content,
        LabelOutcome::NeedsCombiner(input) => {
            let combiner = combiner.ok_or_else(|| anyhow::anyhow!("no combiner configured"))?;
            combiner.combine(&input).await?
        }
    };
    Ok(MlCandidate {
        label,
        confidence,
        content,
    })
}

/// Ask the edit-script engine about every block, one request each.
///
/// The source reports pending from the first request until the last answer
/// (or cancellation) of the latest batch.
pub async fn collect_dl(
    engine: Arc<dyn EditScriptEngine>,
    session: &SharedSession,
    cancel: &CancellationToken,
) -> Result<usize, EngineError> {
    let (batch, requests): (u64, Vec<(usize, EditScriptRequest)>) = {
        let mut guard = session.lock().await;
        let batch = guard.manager.aggregator().dl_batch() + 1;
        guard.manager.commit(CandidateUpdate::DlStarted { batch });
        let count = guard.manager.blocks().len();
        let requests = (1..=count)
            .filter_map(|block| {
                let sides = guard.manager.block_sides(block).ok()?;
                Some((block, EditScriptRequest::from_sides(&sides)))
            })
            .collect();
        (batch, requests)
    };

    let mut tasks = JoinSet::new();
    for (block, request) in requests {
        let engine = engine.clone();
        tasks.spawn(async move { (block, engine.predict(&request).await) });
    }

    let mut committed = 0;
    let mut cancelled = false;
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                cancelled = true;
                break;
            }
            joined = tasks.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        match joined {
            Ok((block, Ok(outcome))) => {
                session
                    .lock()
                    .await
                    .manager
                    .commit(CandidateUpdate::Dl { batch, block, outcome });
                committed += 1;
            }
            Ok((block, Err(e))) => {
                notify(session, Notice::warning(Source::Dl, format!("block {}: {:#}", block, e))).await;
            }
            Err(e) => tracing::error!(error = %e, "DL task panicked"),
        }
    }

    // a newer batch may have started since; the aggregator drops this then
    session
        .lock()
        .await
        .manager
        .commit(CandidateUpdate::DlFinished { batch });
    if cancelled {
        return Err(EngineError::Cancelled);
    }
    Ok(committed)
}

/// Fetch history candidates, one record per block in document order.
pub async fn collect_history(
    source: Arc<dyn HistorySource>,
    session: &SharedSession,
    cancel: &CancellationToken,
) -> Result<usize, EngineError> {
    let query = session.lock().await.file.history_query();
    let records = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        result = source.history(&query) => result?,
    };

    let mut guard = session.lock().await;
    let count = records.len();
    for (i, record) in records.into_iter().enumerate() {
        guard.manager.commit(CandidateUpdate::History {
            block: i + 1,
            candidates: record.into_candidates(),
        });
    }
    Ok(count)
}

/// Send an audit record in the background. The handle yields a notice if the
/// sink refused it; local state is never affected.
pub fn record_choice(sink: Arc<dyn AuditSink>, record: ChoiceRecord) -> JoinHandle<Option<Notice>> {
    tokio::spawn(async move {
        match sink.record(&record).await {
            Ok(()) => {
                tracing::debug!(file = %record.file_name, block = record.block_idx, "Choice recorded");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record choice");
                Some(Notice::error(None, format!("audit: {:#}", e)))
            }
        }
    })
}

/// Run every configured collector concurrently against one session.
/// Failures end up as notices on the session.
pub async fn run_all(
    engines: EngineSet,
    session: SharedSession,
    policy: PollPolicy,
    cancel: CancellationToken,
) {
    tracing::info!(enabled = ?engines.enabled(), "Collecting candidates");

    let heuristic = async {
        match &engines.heuristic {
            Some(engine) => Some(
                poll_heuristic(engine.as_ref(), &session, policy, &cancel)
                    .await
                    .map(|_| ()),
            ),
            None => None,
        }
    };
    let ml = async {
        match &engines.classifier {
            Some(classifier) => Some(
                collect_ml(classifier.clone(), engines.combiner.clone(), &session, &cancel)
                    .await
                    .map(|_| ()),
            ),
            None => None,
        }
    };
    let dl = async {
        match &engines.edit_script {
            Some(engine) => Some(collect_dl(engine.clone(), &session, &cancel).await.map(|_| ())),
            None => None,
        }
    };
    let history = async {
        match &engines.history {
            Some(source) => Some(
                collect_history(source.clone(), &session, &cancel)
                    .await
                    .map(|_| ()),
            ),
            None => None,
        }
    };

    let (heuristic, ml, dl, history) = tokio::join!(heuristic, ml, dl, history);
    let results = [
        (Source::Heuristic, heuristic),
        (Source::Ml, ml),
        (Source::Dl, dl),
        (Source::History, history),
    ];
    for (source, result) in results {
        match result {
            Some(Err(EngineError::Cancelled)) => {
                tracing::info!(%source, "Collector cancelled");
            }
            Some(Err(e @ EngineError::Timeout { .. })) => {
                notify(&session, Notice::warning(source, e.to_string())).await;
            }
            Some(Err(e)) => {
                notify(&session, Notice::error(Some(source), e.to_string())).await;
            }
            Some(Ok(())) | None => {}
        }
    }
}

async fn notify(session: &SharedSession, notice: Notice) {
    session.lock().await.push_notice(notice);
}
