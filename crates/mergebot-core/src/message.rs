//! Request/response shapes of the external engines, plus the per-file
//! context they are built from.

use merge_engine::aggregator::HISTORY_DEPTH;
use merge_engine::{
    BlockSides, ChoiceAudit, CombineInput, DlOutcome, HeuristicReport, HeuristicResolution,
    HistoryCandidate, Source,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Success code of the heuristic engine envelope.
pub const SA_OK: &str = "00000";
/// Success code of the classifier and backend envelopes.
pub const BACKEND_OK: i64 = 200;

/// Where the conflicted file lives and which merge produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileContext {
    pub project_path: String,
    pub target_branch: String,
    pub source_branch: String,
    /// Path of the file, relative to the project.
    pub file_path: String,
    #[serde(default)]
    pub abs_path: String,
    /// Checked-out copies of each version, used by the classifier.
    #[serde(default)]
    pub target_path: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub conflict_path: String,
}

impl FileContext {
    pub fn language(&self) -> &'static str {
        language_of(&self.file_path)
    }

    pub fn heuristic_request(&self) -> HeuristicRequest {
        HeuristicRequest {
            path: self.project_path.clone(),
            ms: MergeScenarioRefs {
                ours: self.target_branch.clone(),
                theirs: self.source_branch.clone(),
            },
            file: if self.abs_path.is_empty() {
                self.file_path.clone()
            } else {
                self.abs_path.clone()
            },
        }
    }

    pub fn classifier_request(&self) -> ClassifierRequest {
        ClassifierRequest {
            path: self.project_path.clone(),
            target: self.target_branch.clone(),
            source: self.source_branch.clone(),
            version1: forward_slashes(&self.target_path),
            version2: forward_slashes(&self.source_path),
            conflict: forward_slashes(&self.conflict_path),
            base: forward_slashes(&self.base_path),
            filetype: self.language().to_string(),
        }
    }

    pub fn history_query(&self) -> HistoryQuery {
        HistoryQuery {
            file_path: if self.abs_path.is_empty() {
                self.file_path.clone()
            } else {
                self.abs_path.clone()
            },
            repo: self.project_path.clone(),
            file_type: 0,
        }
    }

    /// Audit record for the 1-based `block`.
    pub fn choice_record(&self, block: usize, audit: ChoiceAudit) -> ChoiceRecord {
        ChoiceRecord {
            project_path: self.project_path.clone(),
            target_branch: self.target_branch.clone(),
            source_branch: self.source_branch.clone(),
            file_name: self.file_path.clone(),
            block_idx: block.saturating_sub(1),
            block_resolution_choice: audit,
        }
    }
}

fn forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Language tag the classifier expects for a file.
pub fn language_of(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "cc" | "cpp" | "h" | "hpp" | "c++" | "c" | "cp" | "C" | "cxx" => "cpp",
        "java" => "java",
        "kt" => "kotlin",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeScenarioRefs {
    pub ours: String,
    pub theirs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeuristicRequest {
    pub path: String,
    pub ms: MergeScenarioRefs,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaEnvelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicResponse {
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub resolutions: Vec<WireHeuristicResolution>,
    #[serde(default)]
    pub merged: Option<Vec<String>>,
    #[serde(default)]
    pub patches: Option<Vec<WirePatch>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireHeuristicResolution {
    /// 0-based block index.
    pub index: usize,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub code: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePatch {
    pub start: usize,
    pub offset: usize,
    #[serde(default)]
    pub content: Vec<String>,
}

impl HeuristicResponse {
    pub fn into_report(self) -> HeuristicReport {
        HeuristicReport {
            pending: self.pending,
            resolutions: self
                .resolutions
                .into_iter()
                .map(|r| HeuristicResolution {
                    index: r.index + 1,
                    desc: r.desc,
                    confidence: r.confidence,
                    label: r.label,
                    content: r.code.join("\n"),
                })
                .collect(),
            merged: self.merged,
            patches_empty: matches!(&self.patches, Some(p) if p.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifierRequest {
    pub path: String,
    pub target: String,
    pub source: String,
    pub version1: String,
    pub version2: String,
    pub conflict: String,
    pub base: String,
    pub filetype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierEnvelope {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<ClassifierPrediction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierPrediction {
    /// 0-based block index.
    pub index: usize,
    pub label: String,
    #[serde(default)]
    pub confidence: f64,
}

pub type CombineRequest = CombineInput;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineResponse {
    pub is_successful: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditScriptRequest {
    pub base: String,
    pub ours: String,
    pub theirs: String,
}

impl EditScriptRequest {
    pub fn from_sides(sides: &BlockSides) -> Self {
        Self {
            base: lines_with_newline(sides.base.as_deref().unwrap_or(&[])),
            ours: lines_with_newline(&sides.ours),
            theirs: lines_with_newline(&sides.theirs),
        }
    }
}

/// Newline-joined with a trailing newline, or empty.
fn lines_with_newline(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EditScriptData {
    Lines(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditScriptResponse {
    pub is_successful: bool,
    #[serde(default, alias = "resolution")]
    pub data: Option<EditScriptData>,
    #[serde(default)]
    pub msg: String,
}

impl EditScriptResponse {
    pub fn into_outcome(self) -> DlOutcome {
        if !self.is_successful {
            return DlOutcome::Unresolvable;
        }
        match self.data {
            Some(EditScriptData::Lines(lines)) => DlOutcome::Resolvable(lines_with_newline(&lines)),
            Some(EditScriptData::Text(text)) => DlOutcome::Resolvable(text),
            None => DlOutcome::Resolvable(String::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub file_path: String,
    pub repo: String,
    pub file_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEnvelope {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub info: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub history_truth: Vec<String>,
    #[serde(default)]
    pub truth_score: Vec<f64>,
}

impl HistoryRecord {
    /// The first ranked pairs of truth and score.
    pub fn into_candidates(self) -> Vec<HistoryCandidate> {
        self.history_truth
            .into_iter()
            .zip(self.truth_score)
            .take(HISTORY_DEPTH)
            .map(|(content, confidence)| HistoryCandidate {
                content,
                confidence,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceRecord {
    pub project_path: String,
    pub target_branch: String,
    pub source_branch: String,
    pub file_name: String,
    /// 0-based block index.
    pub block_idx: usize,
    pub block_resolution_choice: ChoiceAudit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the user about something that went wrong in the
/// background. Never fatal to the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub source: Option<Source>,
    pub message: String,
}

impl Notice {
    pub fn warning(source: Source, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            source: Some(source),
            message: message.into(),
        }
    }

    pub fn error(source: Option<Source>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(source) => write!(f, "[{}] {}", source, self.message),
            None => f.write_str(&self.message),
        }
    }
}
