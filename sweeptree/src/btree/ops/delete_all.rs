//! Retire a whole tree.
//!
//! Every node is held for write. Leaves release the pages of their blob values and are retired
//! once processed; internal nodes are retired after all of their children; finally the root
//! pointer is cleared. Nothing becomes visible until the transaction commits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use sweeptree_core::{AccessMode, NULL_BLOCK_ID};

use super::traversal::{Child, TraversalPolicy};
use crate::{
    btree::{
        blob::Blob,
        leaf::{set_blob_ref, LeafNode, MAX_INLINE_VALUE_SIZE},
        superblock, Superblock,
    },
    cache::{PageHandle, Transaction},
};

/// What a whole-tree deletion did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    pub leaves_retired: usize,
    pub internal_nodes_retired: usize,
    /// Blob values whose pages were released.
    pub blob_values_released: usize,
    /// Blob pages released, index pages included.
    pub blob_pages_released: usize,
    /// Whether there was a root to clear.
    pub root_cleared: bool,
}

type CompletionHook = Box<dyn Fn(&DeletionSummary) + Send + Sync>;

/// The policy deleting every key of a tree.
#[derive(Default)]
pub struct DeleteAllKeys {
    leaves_retired: AtomicUsize,
    internal_nodes_retired: AtomicUsize,
    blob_values_released: AtomicUsize,
    blob_pages_released: AtomicUsize,
    root_cleared: AtomicBool,
    on_complete: Option<CompletionHook>,
}

impl DeleteAllKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `hook` once the root pointer has been cleared, before the transaction commits.
    ///
    /// Deletion for backfill needs no record of itself, so this is where one would be made if it
    /// ever does.
    pub fn with_completion_hook(
        mut self,
        hook: impl Fn(&DeletionSummary) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    pub fn summary(&self) -> DeletionSummary {
        DeletionSummary {
            leaves_retired: self.leaves_retired.load(Ordering::Relaxed),
            internal_nodes_retired: self.internal_nodes_retired.load(Ordering::Relaxed),
            blob_values_released: self.blob_values_released.load(Ordering::Relaxed),
            blob_pages_released: self.blob_pages_released.load(Ordering::Relaxed),
            root_cleared: self.root_cleared.load(Ordering::Relaxed),
        }
    }
}

impl TraversalPolicy for DeleteAllKeys {
    fn transaction_access_mode(&self) -> AccessMode {
        AccessMode::Write
    }

    fn superblock_access_mode(&self) -> AccessMode {
        AccessMode::Write
    }

    fn node_access_mode(&self) -> AccessMode {
        AccessMode::Write
    }

    fn preprocess_superblock(&self, _txn: &Transaction, _superblock: &PageHandle) -> Result<()> {
        Ok(())
    }

    fn filter_interesting_children(
        &self,
        _txn: &Transaction,
        children: Vec<Child>,
    ) -> Result<Vec<Child>> {
        Ok(children)
    }

    fn process_leaf(&self, txn: &Transaction, leaf: &mut PageHandle) -> Result<()> {
        let blobs: Vec<(usize, Blob)> = LeafNode::new(leaf.data())
            .pairs()
            .enumerate()
            .map(|(i, pair)| (i, Blob::from_reference(pair.value, MAX_INLINE_VALUE_SIZE)))
            .filter(|(_, blob)| matches!(blob, Blob::External(_)))
            .collect();

        for (i, mut blob) in blobs {
            let size = blob.value_size();
            let released = blob.release_region(txn, size)?;
            if let Some(reference) = blob.reference() {
                set_blob_ref(leaf.data_mut(), i, &reference);
            }
            self.blob_values_released.fetch_add(1, Ordering::Relaxed);
            self.blob_pages_released.fetch_add(released, Ordering::Relaxed);
        }
        Ok(())
    }

    fn postprocess_leaf(&self, leaf: &mut PageHandle) {
        leaf.mark_retired();
        self.leaves_retired.fetch_add(1, Ordering::Relaxed);
    }

    fn postprocess_internal_node(&self, node: &mut PageHandle) {
        node.mark_retired();
        self.internal_nodes_retired.fetch_add(1, Ordering::Relaxed);
    }

    fn postprocess_superblock(&self, superblock: &mut PageHandle) {
        if !Superblock::new(superblock.data()).is_empty() {
            superblock::set_root_block(superblock.data_mut(), NULL_BLOCK_ID);
            self.root_cleared.store(true, Ordering::Relaxed);
        }
        if let Some(hook) = &self.on_complete {
            hook(&self.summary());
        }
    }
}
