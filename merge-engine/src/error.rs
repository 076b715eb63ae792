use thiserror::Error;

use crate::types::Source;

/// Failures of a single apply or candidate lookup. None of these leave the
/// buffer modified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("target region of block {block} not found, consider resetting")]
    LocationNotFound { block: usize },

    #[error("no {origin} resolution available for block {block}")]
    MissingResolution { origin: Source, block: usize },

    #[error("{origin} resolutions are still pending")]
    ResolutionPending { origin: Source },

    #[error("{origin} marked block {block} as unresolvable")]
    Unresolvable { origin: Source, block: usize },

    #[error("block {block} has no base version")]
    NoBaseVersion { block: usize },

    #[error("block {block} out of range ({count} blocks)")]
    BlockOutOfRange { block: usize, count: usize },

    #[error("semantic patch {index} out of range")]
    PatchOutOfRange { index: usize },

    #[error("unknown strategy label: {0}")]
    UnknownLabel(String),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
