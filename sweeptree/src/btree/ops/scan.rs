//! Collect the pairs within a key range.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use sweeptree_core::AccessMode;

use super::traversal::{Child, TraversalPolicy};
use crate::{
    btree::{
        blob::{self, BlobRef},
        leaf::{LeafNode, ValueRef},
        Key,
    },
    cache::{PageHandle, Transaction},
};

/// A read-only policy gathering the pairs with keys in `[start, end)`.
///
/// Subtrees which cannot hold keys in the range are never visited.
pub struct RangeScan {
    start: Key,
    end: Option<Key>,
    pairs: Mutex<Vec<(Key, Vec<u8>)>>,
    leaves_visited: AtomicUsize,
}

impl RangeScan {
    /// Scan `[start, end)`, or everything from `start` if `end` is `None`.
    pub fn new(start: Key, end: Option<Key>) -> Self {
        RangeScan {
            start,
            end,
            pairs: Mutex::new(Vec::new()),
            leaves_visited: AtomicUsize::new(0),
        }
    }

    pub fn leaves_visited(&self) -> usize {
        self.leaves_visited.load(Ordering::Relaxed)
    }

    /// The collected pairs, in key order.
    pub fn take_pairs(&self) -> Vec<(Key, Vec<u8>)> {
        let mut pairs = std::mem::take(&mut *self.pairs.lock());
        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    fn contains(&self, key: &Key) -> bool {
        key >= &self.start && self.end.as_ref().map_or(true, |end| key < end)
    }
}

impl TraversalPolicy for RangeScan {
    fn transaction_access_mode(&self) -> AccessMode {
        AccessMode::Read
    }

    fn superblock_access_mode(&self) -> AccessMode {
        AccessMode::Read
    }

    fn node_access_mode(&self) -> AccessMode {
        AccessMode::Read
    }

    fn preprocess_superblock(&self, _txn: &Transaction, _superblock: &PageHandle) -> Result<()> {
        Ok(())
    }

    fn filter_interesting_children(
        &self,
        _txn: &Transaction,
        children: Vec<Child>,
    ) -> Result<Vec<Child>> {
        Ok(children
            .into_iter()
            .filter(|child| child.overlaps(&self.start, self.end.as_ref()))
            .collect())
    }

    fn process_leaf(&self, txn: &Transaction, leaf: &mut PageHandle) -> Result<()> {
        self.leaves_visited.fetch_add(1, Ordering::Relaxed);
        let mut found = Vec::new();
        for pair in LeafNode::new(leaf.data()).pairs() {
            if !self.contains(&pair.key) {
                continue;
            }
            let value = match pair.value {
                ValueRef::Inline(v) => v.to_vec(),
                ValueRef::Blob(raw) => blob::read(txn, &BlobRef::decode(raw))?,
            };
            found.push((pair.key, value));
        }
        self.pairs.lock().extend(found);
        Ok(())
    }

    fn postprocess_internal_node(&self, _node: &mut PageHandle) {}

    fn postprocess_superblock(&self, _superblock: &mut PageHandle) {}
}
