//! Content identity for cells
//!
//! A [`CellId`] is derived from the trimmed block text and its position in
//! the document, so the same block re-rendered in place keeps its id.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Stable identity of one fenced block instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    hash: [u8; 8],
    position: usize,
}

impl CellId {
    /// Position of the block in its document
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Short hex form of the content hash
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(self.hash)
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}-{}", self.short(), self.position)
    }
}

/// Compute the identity of a block
///
/// Surrounding whitespace does not change the id.
#[must_use]
pub fn identify(raw_text: &str, position: usize) -> CellId {
    let digest = blake3::hash(raw_text.trim().as_bytes());
    let mut hash = [0u8; 8];
    hash.copy_from_slice(&digest.as_bytes()[..8]);
    CellId { hash, position }
}
