//! BTree Operations.

use anyhow::{Context, Result};
use sweeptree_core::{AccessMode, BlockId};

use super::{
    blob::{self, BlobRef},
    leaf::ValueRef,
    InternalNode, Key, LeafNode, PageKind, Superblock,
};
use crate::cache::Transaction;

pub mod bulk_load;
pub mod delete_all;
pub mod scan;
pub mod traversal;

pub use bulk_load::{bulk_load, BulkLoadParams, BulkLoadStats};
pub use delete_all::{DeleteAllKeys, DeletionSummary};
pub use scan::RangeScan;
pub use traversal::{traverse, Child, TraversalPolicy};

/// Look up a key in the tree rooted at the given superblock.
///
/// Pages are read top-down, each released once its child has been acquired.
pub fn lookup(txn: &Transaction, superblock: BlockId, key: &Key) -> Result<Option<Vec<u8>>> {
    let mut page = txn.acquire(superblock, AccessMode::Read)?;
    let mut next = Superblock::new(page.data()).root_block();

    loop {
        if next.is_null() {
            return Ok(None);
        }
        let child = txn
            .acquire(next, AccessMode::Read)
            .with_context(|| format!("lookup of {:?}", key))?;
        page = child;

        match PageKind::of(page.data()) {
            Some(PageKind::Internal) => {
                let node = InternalNode::new(page.data());
                next = node.child(node.search(key));
            }
            Some(PageKind::Leaf) => {
                let leaf = LeafNode::new(page.data());
                return match leaf.get(key) {
                    None => Ok(None),
                    Some(ValueRef::Inline(v)) => Ok(Some(v.to_vec())),
                    Some(ValueRef::Blob(raw)) => {
                        let blob_ref = BlobRef::decode(raw);
                        blob::read(txn, &blob_ref).map(Some)
                    }
                };
            }
            kind => panic!("block {} is not a tree node: {:?}", page.block_id(), kind),
        }
    }
}
