//! Content fingerprints for relocating conflict blocks after the buffer has
//! been edited around them.

use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::types::{ConflictBlock, END_MARKER, Interval, START_MARKER};

/// SHA-256 of a block's marker-to-marker text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex digits, for listings.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Hash of `lines[start..=end]` joined with `\n` (0-based, inclusive).
/// A range that does not fit the buffer hashes as the empty string.
pub fn fingerprint<S: AsRef<str>>(lines: &[S], start: usize, end: usize) -> Fingerprint {
    let mut hasher = Sha256::new();
    if start <= end && end < lines.len() {
        for (i, line) in lines[start..=end].iter().enumerate() {
            if i > 0 {
                hasher.update(b"\n");
            }
            hasher.update(line.as_ref().as_bytes());
        }
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Fingerprint(digest)
}

/// Fingerprint of a parsed block, markers included.
pub fn block_fingerprint<S: AsRef<str>>(lines: &[S], block: &ConflictBlock) -> Fingerprint {
    fingerprint(lines, block.our_marker_line - 1, block.end_marker_line - 1)
}

/// Find the first start..end marker run in `lines` whose content hashes to
/// `target`.
pub fn locate<S: AsRef<str>>(lines: &[S], target: &Fingerprint) -> Option<Interval> {
    let mut i = 0;
    while i < lines.len() {
        if !lines[i].as_ref().starts_with(START_MARKER) {
            i += 1;
            continue;
        }
        let start = i;
        let end = lines[start + 1..]
            .iter()
            .position(|l| l.as_ref().starts_with(END_MARKER))
            .map(|p| start + 1 + p)?;

        if fingerprint(lines, start, end) == *target {
            return Some(Interval { start, end });
        }
        i = end + 1;
    }
    None
}

/// Fingerprints of the blocks found when a file was loaded. Entry `i` belongs
/// to block `i + 1`; the index never changes afterwards.
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    prints: Vec<Fingerprint>,
}

impl FingerprintIndex {
    pub fn build<S: AsRef<str>>(lines: &[S], blocks: &[ConflictBlock]) -> Self {
        Self {
            prints: blocks.iter().map(|b| block_fingerprint(lines, b)).collect(),
        }
    }

    /// Fingerprint of the 1-based `block`.
    pub fn get(&self, block: usize) -> Option<&Fingerprint> {
        block.checked_sub(1).and_then(|i| self.prints.get(i))
    }

    /// Where the 1-based `block` currently sits in `lines`.
    pub fn locate<S: AsRef<str>>(&self, lines: &[S], block: usize) -> Option<Interval> {
        self.get(block).and_then(|fp| locate(lines, fp))
    }

    pub fn len(&self) -> usize {
        self.prints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.prints.iter()
    }
}
