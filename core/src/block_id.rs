//! Block identifiers and sets thereof.
//!
//! A block id names exactly one fixed-size page within a cache. The value `0` is reserved and
//! denotes the absence of a block: an empty tree has a null root and a missing child is a null
//! child. The allocator never hands out the null block.

use alloc::collections::BTreeSet;
use core::fmt;

/// The identifier of a page.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshSerialize, borsh::BorshDeserialize)
)]
pub struct BlockId(pub u32);

/// The sentinel denoting "no block".
pub const NULL_BLOCK_ID: BlockId = BlockId(0);

impl BlockId {
    pub fn is_null(&self) -> bool {
        *self == NULL_BLOCK_ID
    }

    /// Decode a block id from the first 4 bytes of the slice.
    ///
    /// Panics if the slice is shorter than 4 bytes.
    pub fn from_le_slice(raw: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&raw[..4]);
        BlockId(u32::from_le_bytes(buf))
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl From<u32> for BlockId {
    fn from(x: u32) -> Self {
        BlockId(x)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "BlockId(null)")
        } else {
            write!(f, "BlockId({})", self.0)
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An ordered set of block ids.
///
/// The null block can never be a member.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BlockIdSet {
    inner: BTreeSet<BlockId>,
}

impl BlockIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block id. Returns `false` if it was already present.
    ///
    /// Panics if the id is the null block.
    pub fn insert(&mut self, id: BlockId) -> bool {
        assert!(!id.is_null(), "the null block cannot be a set member");
        self.inner.insert(id)
    }

    pub fn remove(&mut self, id: &BlockId) -> bool {
        self.inner.remove(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.inner.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.inner.iter().copied()
    }

    pub fn is_subset(&self, other: &BlockIdSet) -> bool {
        self.inner.is_subset(&other.inner)
    }

    pub fn is_disjoint(&self, other: &BlockIdSet) -> bool {
        self.inner.is_disjoint(&other.inner)
    }

    /// Ids in `self` that are not in `other`.
    pub fn difference<'a>(&'a self, other: &'a BlockIdSet) -> impl Iterator<Item = BlockId> + 'a {
        self.inner.difference(&other.inner).copied()
    }
}

impl FromIterator<BlockId> for BlockIdSet {
    fn from_iter<I: IntoIterator<Item = BlockId>>(iter: I) -> Self {
        let mut set = BlockIdSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl Extend<BlockId> for BlockIdSet {
    fn extend<I: IntoIterator<Item = BlockId>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl fmt::Debug for BlockIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockId, BlockIdSet, NULL_BLOCK_ID};
    use quickcheck::quickcheck;

    #[test]
    fn null_block_is_zero() {
        assert!(NULL_BLOCK_ID.is_null());
        assert!(!BlockId(1).is_null());
        assert_eq!(BlockId::default(), NULL_BLOCK_ID);
    }

    #[test]
    #[should_panic]
    fn null_block_not_insertable() {
        let mut set = BlockIdSet::new();
        set.insert(NULL_BLOCK_ID);
    }

    #[test]
    fn set_difference() {
        let a: BlockIdSet = [1, 2, 3].into_iter().map(BlockId).collect();
        let b: BlockIdSet = [2, 3].into_iter().map(BlockId).collect();
        assert!(b.is_subset(&a));
        assert_eq!(a.difference(&b).collect::<Vec<_>>(), vec![BlockId(1)]);
        assert!(!a.is_disjoint(&b));
    }

    quickcheck! {
        fn le_bytes_decode(x: u32) -> bool {
            BlockId::from_le_slice(&BlockId(x).to_le_bytes()) == BlockId(x)
        }
    }
}
