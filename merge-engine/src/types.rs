//! Core types for the merge engine.
//!
//! Line numbers follow the editor convention: conflict blocks, hunks and
//! semantic patches are 1-based, while [`Interval`] (the result of relocating a
//! block by fingerprint) is a 0-based inclusive index range into the buffer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opens a conflict block; the "ours" side follows.
pub const START_MARKER: &str = "<<<<<<<";
/// Separates "ours" from the common ancestor in diff3-style conflicts.
pub const BASE_MARKER: &str = "|||||||";
/// Separates the preceding side from "theirs".
pub const MID_MARKER: &str = "=======";
/// Closes a conflict block.
pub const END_MARKER: &str = ">>>>>>>";

/// One unresolved region delimited by merge markers.
///
/// All fields are 1-based line numbers of the marker lines themselves.
/// `base_marker_line` is `None` for a classic two-way conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictBlock {
    pub our_marker_line: usize,
    pub base_marker_line: Option<usize>,
    pub their_marker_line: usize,
    pub end_marker_line: usize,
}

impl ConflictBlock {
    pub fn is_three_way(&self) -> bool {
        self.base_marker_line.is_some()
    }

    /// Number of lines covered, markers included.
    pub fn line_count(&self) -> usize {
        self.end_marker_line - self.our_marker_line + 1
    }

    /// Whether the 1-based inclusive range `[start, end]` touches this block.
    pub fn intersects(&self, start: usize, end: usize) -> bool {
        end >= self.our_marker_line && start <= self.end_marker_line
    }

    /// Number of lines shared with the 1-based inclusive range `[start, end]`.
    pub fn overlap(&self, start: usize, end: usize) -> usize {
        let lo = start.max(self.our_marker_line);
        let hi = end.min(self.end_marker_line);
        if hi >= lo { hi - lo + 1 } else { 0 }
    }

    /// Lines between the start marker and the base (or mid) marker.
    pub fn ours<'a, S>(&self, lines: &'a [S]) -> &'a [S] {
        let stop = self.base_marker_line.unwrap_or(self.their_marker_line);
        slice_between(lines, self.our_marker_line, stop)
    }

    /// Lines between the base marker and the mid marker, if this is a
    /// three-way conflict.
    pub fn base<'a, S>(&self, lines: &'a [S]) -> Option<&'a [S]> {
        self.base_marker_line
            .map(|base| slice_between(lines, base, self.their_marker_line))
    }

    /// Lines between the mid marker and the end marker.
    pub fn theirs<'a, S>(&self, lines: &'a [S]) -> &'a [S] {
        slice_between(lines, self.their_marker_line, self.end_marker_line)
    }

    /// Owned copy of all three sides.
    pub fn sides<S: AsRef<str>>(&self, lines: &[S]) -> BlockSides {
        BlockSides {
            ours: to_owned_lines(self.ours(lines)),
            base: self.base(lines).map(to_owned_lines),
            theirs: to_owned_lines(self.theirs(lines)),
        }
    }
}

/// Content strictly between two 1-based marker lines.
fn slice_between<S>(lines: &[S], open: usize, close: usize) -> &[S] {
    // marker at 1-based `open` sits at index open - 1; content starts right after it
    let from = open;
    let to = close.saturating_sub(1);
    if from > to {
        return &[];
    }
    lines.get(from..to).unwrap_or(&[])
}

pub(crate) fn to_owned_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines.iter().map(|l| l.as_ref().to_string()).collect()
}

/// The three versions of a conflict block, copied out of a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSides {
    pub ours: Vec<String>,
    pub base: Option<Vec<String>>,
    pub theirs: Vec<String>,
}

impl BlockSides {
    pub fn side(&self, side: Side) -> Option<&[String]> {
        match side {
            Side::Ours => Some(&self.ours),
            Side::Base => self.base.as_deref(),
            Side::Theirs => Some(&self.theirs),
        }
    }
}

/// A 0-based, inclusive index range into a line buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    pub fn line_count(&self) -> usize {
        self.end - self.start + 1
    }
}

/// One contiguous run of change between an old and a new text.
///
/// `start` is the 1-based line in the old text where the run begins and
/// `offset` the number of old lines it replaces (zero for a pure insertion,
/// which then goes in front of line `start`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub start: usize,
    pub offset: usize,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
}

impl DiffHunk {
    /// Last old line covered; `start - 1` for a pure insertion.
    pub fn end(&self) -> usize {
        self.start + self.offset - 1
    }

    pub fn old_content(&self) -> String {
        self.old_lines.join("\n")
    }

    pub fn new_content(&self) -> String {
        self.new_lines.join("\n")
    }

    /// True when old and new differ only in whitespace.
    pub fn is_whitespace_only(&self) -> bool {
        let strip = |lines: &[String]| -> String {
            lines
                .iter()
                .flat_map(|l| l.chars())
                .filter(|c| !c.is_whitespace())
                .collect()
        };
        strip(&self.old_lines) == strip(&self.new_lines)
    }
}

/// A replacement for `offset` buffer lines starting at 1-based `start`,
/// reconciled so that it covers whole conflict blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticPatch {
    pub start: usize,
    pub offset: usize,
    pub new_lines: Vec<String>,
}

impl SemanticPatch {
    pub fn end(&self) -> usize {
        self.start + self.offset - 1
    }

    pub fn new_content(&self) -> String {
        self.new_lines.join("\n")
    }

    /// Whether this patch covers any line of the 0-based interval `at`.
    /// A pure insertion counts as covering the line it goes in front of.
    pub fn touches(&self, at: Interval) -> bool {
        let start = self.start.saturating_sub(1);
        let end = start + self.offset.max(1) - 1;
        start <= at.end && end >= at.start
    }

    /// Splice this patch into `lines`. Returns false, leaving `lines`
    /// untouched, when the patch does not fit the buffer.
    pub fn apply(&self, lines: &mut Vec<String>) -> bool {
        if self.start == 0 || self.start - 1 + self.offset > lines.len() {
            return false;
        }
        let from = self.start - 1;
        lines.splice(from..from + self.offset, self.new_lines.iter().cloned());
        true
    }
}

impl From<DiffHunk> for SemanticPatch {
    fn from(hunk: DiffHunk) -> Self {
        Self {
            start: hunk.start,
            offset: hunk.offset,
            new_lines: hunk.new_lines,
        }
    }
}

/// The engine a resolution candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Static-analysis engine; also supplies the merged reference.
    Heuristic,
    /// Classifier that predicts a resolution strategy label.
    Ml,
    /// Edit-script predictor.
    Dl,
    /// Resolutions mined from version-control history.
    History,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Heuristic, Source::Ml, Source::Dl, Source::History];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Heuristic => "heuristic",
            Source::Ml => "ml",
            Source::Dl => "dl",
            Source::History => "history",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a conflict block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ours,
    Base,
    Theirs,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Ours => "ours",
            Side::Base => "base",
            Side::Theirs => "theirs",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user asked to put in place of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    /// Keep one side verbatim.
    Side(Side),
    /// Best heuristic resolution for the block.
    Heuristic,
    /// A precomputed semantic patch, by index into the current patch list.
    SemanticPatch(usize),
    Ml,
    Dl,
    /// A history candidate, by rank (0 is the most confident).
    History { rank: usize },
}

impl ResolutionChoice {
    /// The engine backing this choice, if any.
    pub fn source(&self) -> Option<Source> {
        match self {
            ResolutionChoice::Side(_) => None,
            ResolutionChoice::Heuristic | ResolutionChoice::SemanticPatch(_) => {
                Some(Source::Heuristic)
            }
            ResolutionChoice::Ml => Some(Source::Ml),
            ResolutionChoice::Dl => Some(Source::Dl),
            ResolutionChoice::History { .. } => Some(Source::History),
        }
    }

    /// Label recorded by the audit sink. Semantic patches are audited as
    /// heuristic ("sa") choices.
    pub fn audit_label(&self) -> &'static str {
        match self {
            ResolutionChoice::Side(side) => side.as_str(),
            ResolutionChoice::Heuristic | ResolutionChoice::SemanticPatch(_) => "sa",
            ResolutionChoice::Ml => "ml",
            ResolutionChoice::Dl => "dl",
            ResolutionChoice::History { .. } => "git",
        }
    }
}

impl fmt::Display for ResolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionChoice::Side(side) => write!(f, "{}", side),
            ResolutionChoice::Heuristic => write!(f, "heuristic"),
            ResolutionChoice::SemanticPatch(i) => write!(f, "patch #{}", i + 1),
            ResolutionChoice::Ml => write!(f, "ml"),
            ResolutionChoice::Dl => write!(f, "dl"),
            ResolutionChoice::History { rank } => write!(f, "history #{}", rank + 1),
        }
    }
}

/// A proposed replacement for a block, normalized across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCandidate {
    pub source: Source,
    /// 1-based block index.
    pub block_index: usize,
    pub content: String,
    pub confidence: Option<f64>,
    pub label: Option<String>,
    pub resolvable: Option<bool>,
}
