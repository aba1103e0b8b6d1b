/// Here is the layout of an internal node:
///
/// ```rust,ignore
/// kind: u8 // PageKind::Internal
/// padding: u8
/// n: u16 // number of children
/// entries: [(separator: [u8; 32], child: u32); n]
/// ```
///
/// The separator of entry `i` is the lowest key which may be found under child `i`. The
/// separator of the first entry is not meaningful: the first child inherits the lower bound of
/// the node itself.
use sweeptree_core::{page::PAGE_SIZE, BlockId};

use crate::btree::{Key, PageKind};

const N_OFFSET: usize = 2;
const INTERNAL_HEADER_SIZE: usize = 4;
const ENTRY_SIZE: usize = 32 + 4;

/// The maximum number of children of an internal node.
pub const MAX_CHILDREN: usize = (PAGE_SIZE - INTERNAL_HEADER_SIZE) / ENTRY_SIZE;

/// A child pointer along with the key range it covers.
///
/// `low` is inclusive; `high` is exclusive, or unbounded if `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    pub block_id: BlockId,
    pub low: Key,
    pub high: Option<Key>,
}

impl Child {
    /// The root, covering every key.
    pub fn root(block_id: BlockId) -> Self {
        Child {
            block_id,
            low: [0; 32],
            high: None,
        }
    }

    /// Whether any key in `[start, end)` may be found under this child.
    pub fn overlaps(&self, start: &Key, end: Option<&Key>) -> bool {
        let below_high = self.high.as_ref().map_or(true, |high| start < high);
        let above_low = end.map_or(true, |end| &self.low < end);
        below_high && above_low
    }
}

/// A view over an internal node page.
pub struct InternalNode<'a> {
    inner: &'a [u8],
}

impl<'a> InternalNode<'a> {
    /// Panics if the page is not an internal node.
    pub fn new(page: &'a [u8]) -> Self {
        assert_eq!(
            PageKind::of(page),
            Some(PageKind::Internal),
            "page is not an internal node"
        );
        let node = InternalNode { inner: page };
        assert!(node.n() <= MAX_CHILDREN, "malformed internal node");
        node
    }

    pub fn n(&self) -> usize {
        u16::from_le_bytes([self.inner[N_OFFSET], self.inner[N_OFFSET + 1]]) as usize
    }

    pub fn separator(&self, i: usize) -> Key {
        assert!(i < self.n());
        let start = INTERNAL_HEADER_SIZE + i * ENTRY_SIZE;
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.inner[start..start + 32]);
        key
    }

    pub fn child(&self, i: usize) -> BlockId {
        assert!(i < self.n());
        let start = INTERNAL_HEADER_SIZE + i * ENTRY_SIZE + 32;
        BlockId::from_le_slice(&self.inner[start..start + 4])
    }

    /// All children in key order, with the bounds derived from the node's own bounds.
    pub fn children(&self, low: Key, high: Option<Key>) -> Vec<Child> {
        let n = self.n();
        (0..n)
            .map(|i| Child {
                block_id: self.child(i),
                low: if i == 0 { low } else { self.separator(i) },
                high: if i + 1 < n {
                    Some(self.separator(i + 1))
                } else {
                    high
                },
            })
            .collect()
    }

    /// The index of the child whose range contains the key.
    ///
    /// Panics if the node has no children.
    pub fn search(&self, key: &Key) -> usize {
        assert!(self.n() > 0, "empty internal node");
        let mut low = 1;
        let mut high = self.n();
        while low < high {
            let mid = low + (high - low) / 2;
            if &self.separator(mid) <= key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low - 1
    }
}

/// Writes child pointers into a fresh internal node page, in key order.
pub struct InternalBuilder<'a> {
    page: &'a mut [u8],
    n: usize,
}

impl<'a> InternalBuilder<'a> {
    pub fn new(page: &'a mut [u8]) -> Self {
        assert_eq!(page.len(), PAGE_SIZE);
        page[0] = PageKind::Internal.byte();
        page[1] = 0;
        page[N_OFFSET..N_OFFSET + 2].copy_from_slice(&0u16.to_le_bytes());
        InternalBuilder { page, n: 0 }
    }

    pub fn is_full(&self) -> bool {
        self.n == MAX_CHILDREN
    }

    /// Append a child whose keys are all at least `separator`.
    ///
    /// Panics if the node is full or separators are not strictly ascending.
    pub fn push(&mut self, separator: Key, child: BlockId) {
        assert!(!self.is_full(), "internal node is full");
        assert!(!child.is_null(), "null child pointer");
        if self.n > 1 {
            let prev = InternalNode {
                inner: &*self.page,
            }
            .separator(self.n - 1);
            assert!(separator > prev, "separators must be strictly ascending");
        }

        let start = INTERNAL_HEADER_SIZE + self.n * ENTRY_SIZE;
        self.page[start..start + 32].copy_from_slice(&separator);
        self.page[start + 32..start + ENTRY_SIZE].copy_from_slice(&child.to_le_bytes());
        self.n += 1;
        self.page[N_OFFSET..N_OFFSET + 2].copy_from_slice(&(self.n as u16).to_le_bytes());
    }
}
