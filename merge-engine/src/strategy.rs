//! Resolution strategies selected by classifier labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::types::{BASE_MARKER, BlockSides, END_MARKER, MID_MARKER, START_MARKER};

/// What the classifier predicts should happen to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MlLabel {
    #[serde(rename = "V1")]
    PickLeft,
    #[serde(rename = "V2")]
    PickRight,
    #[serde(rename = "CC")]
    ConcatBoth,
    #[serde(rename = "NC")]
    KeepConflict,
    #[serde(rename = "CB")]
    Combine,
}

impl MlLabel {
    pub fn code(&self) -> &'static str {
        match self {
            MlLabel::PickLeft => "V1",
            MlLabel::PickRight => "V2",
            MlLabel::ConcatBoth => "CC",
            MlLabel::KeepConflict => "NC",
            MlLabel::Combine => "CB",
        }
    }

    /// Run the strategy on a block. `Combine` cannot be decided locally and
    /// hands back the request for the combiner service instead.
    pub fn apply(&self, sides: &BlockSides) -> LabelOutcome {
        match self {
            MlLabel::PickLeft => LabelOutcome::Resolved(sides.ours.join("\n")),
            MlLabel::PickRight => LabelOutcome::Resolved(sides.theirs.join("\n")),
            MlLabel::ConcatBoth => LabelOutcome::Resolved(format!(
                "{}\n{}",
                sides.ours.join("\n"),
                sides.theirs.join("\n")
            )),
            MlLabel::KeepConflict => LabelOutcome::Resolved(conflict_chunk(sides)),
            MlLabel::Combine => LabelOutcome::NeedsCombiner(CombineInput {
                version1: sides.ours.join("\n"),
                version2: sides.theirs.join("\n"),
                base: sides.base.as_ref().map(|b| b.join("\n")).unwrap_or_default(),
            }),
        }
    }
}

impl fmt::Display for MlLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MlLabel {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V1" => Ok(MlLabel::PickLeft),
            "V2" => Ok(MlLabel::PickRight),
            "CC" => Ok(MlLabel::ConcatBoth),
            "NC" => Ok(MlLabel::KeepConflict),
            "CB" => Ok(MlLabel::Combine),
            other => Err(ResolveError::UnknownLabel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOutcome {
    Resolved(String),
    NeedsCombiner(CombineInput),
}

/// Payload for the external combiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineInput {
    pub version1: String,
    pub version2: String,
    pub base: String,
}

/// Rebuild a conflict chunk with bare markers. The branch labels that
/// followed the markers in the file are not recoverable from the sides.
pub fn conflict_chunk(sides: &BlockSides) -> String {
    let mut lines: Vec<&str> = vec![START_MARKER];
    lines.extend(sides.ours.iter().map(String::as_str));
    if let Some(base) = &sides.base {
        lines.push(BASE_MARKER);
        lines.extend(base.iter().map(String::as_str));
    }
    lines.push(MID_MARKER);
    lines.extend(sides.theirs.iter().map(String::as_str));
    lines.push(END_MARKER);
    lines.join("\n")
}
