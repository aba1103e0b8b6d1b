//! Traversal and bulk mutation of transactional B-trees.
//!
//! Trees live in a [`Cache`] of fixed-size pages, which groups page mutations into atomically
//! committed transactions. The traversal in [`btree::ops::traversal`] walks a tree top-down,
//! hands every page to a pluggable [`TraversalPolicy`] and post-processes parents only after
//! their children, optionally visiting sibling subtrees on a thread pool. Deleting every key of a
//! tree is one such policy; see [`BtreeSlice::delete_all_keys_for_backfill`].

pub mod btree;
pub mod cache;
pub mod logging;
pub mod metrics;
pub mod order;

mod options;
mod slice;
mod task;

pub use btree::{
    ops::{
        BulkLoadParams, BulkLoadStats, Child, DeleteAllKeys, DeletionSummary, RangeScan,
        TraversalPolicy,
    },
    Key,
};
pub use cache::{Cache, CommitOutput, PageHandle, Transaction};
pub use metrics::{Metric, Metrics};
pub use options::Options;
pub use slice::BtreeSlice;

pub use sweeptree_core::{
    page::PAGE_SIZE, AccessMode, BlockId, BlockIdSet, OrderToken, ReplicationTimestamp,
    NULL_BLOCK_ID,
};
