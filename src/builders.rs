//! Pre-wired layer stacks for common setups.

use crate::memory::MemoryFs;
use crate::whiteout::{MemoryWhiteoutCache, WhiteoutFs};

/// A fresh in-memory filesystem wrapped in a whiteout layer.
///
/// This is the canonical writable branch for a
/// [`UnionFs`](crate::UnionFs): it is writable, advertises `WHITEOUT`,
/// and keeps its deletion marks in memory.
pub fn memory_branch() -> WhiteoutFs<MemoryWhiteoutCache, MemoryFs> {
    WhiteoutFs::new(MemoryWhiteoutCache::new(), MemoryFs::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Vfs;
    use crate::types::Features;

    #[test]
    fn memory_branch_qualifies_as_a_writable_branch() {
        let branch = memory_branch();
        assert!(branch.has_feature(Features::WHITEOUT));
        assert!(!branch.has_feature(Features::READONLY));
    }
}
