//! The generic tree traversal.
//!
//! [`traverse`] walks a tree top-down from its superblock and hands every visited page to a
//! [`TraversalPolicy`]. Pages are acquired parent before child and each one is held until the
//! policy has post-processed it, which happens only once every selected child has been fully
//! processed. Combined with the atomic commit of the enclosing transaction, this lets a policy
//! destroy the tree bottom-up without ever exposing a partial state.
//!
//! Children of the first node with more than one selected child may be traversed as tasks on a
//! thread pool. Deeper levels are traversed sequentially within each task so that pool workers
//! never wait on other pool tasks.

use std::sync::Arc;

use anyhow::{Context, Result};
use sweeptree_core::{AccessMode, BlockId, BlockIdSet};
use threadpool::ThreadPool;

use crate::{
    btree::{InternalNode, PageKind, Superblock},
    cache::{PageHandle, Transaction},
    metrics::Metric,
    task::{join_tasks, spawn_task},
};

pub use crate::btree::internal::Child;

/// Per-page behavior plugged into [`traverse`].
///
/// A policy is shared by every task of a traversal.
pub trait TraversalPolicy: Send + Sync {
    /// The weakest mode of transaction the policy can run in.
    fn transaction_access_mode(&self) -> AccessMode;

    fn superblock_access_mode(&self) -> AccessMode;

    /// The mode every node is acquired with.
    fn node_access_mode(&self) -> AccessMode;

    /// Called before anything else, with the superblock held.
    fn preprocess_superblock(&self, txn: &Transaction, superblock: &PageHandle) -> Result<()>;

    /// Select the children of an internal node to descend into. The result must be a subset of
    /// `children`.
    fn filter_interesting_children(
        &self,
        txn: &Transaction,
        children: Vec<Child>,
    ) -> Result<Vec<Child>>;

    fn process_leaf(&self, txn: &Transaction, leaf: &mut PageHandle) -> Result<()>;

    /// Called right after [`TraversalPolicy::process_leaf`], with the leaf still held.
    fn postprocess_leaf(&self, _leaf: &mut PageHandle) {}

    /// Called once all selected children of the node have been processed.
    fn postprocess_internal_node(&self, node: &mut PageHandle);

    /// Called last, whether or not the tree was empty.
    fn postprocess_superblock(&self, superblock: &mut PageHandle);
}

/// Traverse the tree of the given superblock with the policy.
///
/// With a thread pool, sibling subtrees may be visited concurrently. An error acquiring any page
/// aborts the traversal once all running tasks have finished and is returned; the transaction
/// should then be dropped, which discards everything the policy did.
///
/// Panics if the transaction's mode does not cover the policy's transaction mode.
pub fn traverse<P: TraversalPolicy + 'static>(
    txn: &Transaction,
    superblock_id: BlockId,
    policy: &Arc<P>,
    thread_pool: Option<&ThreadPool>,
) -> Result<()> {
    assert!(
        txn.mode().covers(policy.transaction_access_mode()),
        "policy requires a {:?} transaction, got {:?}",
        policy.transaction_access_mode(),
        txn.mode()
    );
    let metrics = txn.cache().metrics().clone();
    let _timer = metrics.record(Metric::TraversalTime);

    let mut superblock = txn
        .acquire(superblock_id, policy.superblock_access_mode())
        .context("failed to acquire the superblock")?;
    policy.preprocess_superblock(txn, &superblock)?;

    let root = Superblock::new(superblock.data()).root_block();
    tracing::debug!(txn = txn.id(), superblock = %superblock_id, %root, "traversal start");
    if !root.is_null() {
        process_node(txn, policy, Child::root(root), thread_pool)?;
    }

    policy.postprocess_superblock(&mut superblock);
    tracing::debug!(txn = txn.id(), superblock = %superblock_id, "traversal done");
    Ok(())
}

fn process_node<P: TraversalPolicy + 'static>(
    txn: &Transaction,
    policy: &Arc<P>,
    child: Child,
    thread_pool: Option<&ThreadPool>,
) -> Result<()> {
    let mut node = txn
        .acquire(child.block_id, policy.node_access_mode())
        .with_context(|| format!("failed to acquire node {}", child.block_id))?;

    match PageKind::of(node.data()) {
        Some(PageKind::Leaf) => {
            tracing::trace!(block = %child.block_id, "leaf");
            policy.process_leaf(txn, &mut node)?;
            policy.postprocess_leaf(&mut node);
            txn.cache().metrics().count(Metric::LeavesProcessed);
        }
        Some(PageKind::Internal) => {
            let children = InternalNode::new(node.data()).children(child.low, child.high);
            let selected = policy.filter_interesting_children(txn, children.clone())?;
            assert!(
                is_subset(&selected, &children),
                "filter selected children of another node"
            );
            tracing::trace!(
                block = %child.block_id,
                children = children.len(),
                selected = selected.len(),
                "internal node"
            );

            match thread_pool {
                Some(thread_pool) if selected.len() > 1 => {
                    fan_out(txn, policy, selected, thread_pool)?
                }
                _ => {
                    for child in selected {
                        process_node(txn, policy, child, thread_pool)?;
                    }
                }
            }

            policy.postprocess_internal_node(&mut node);
            txn.cache().metrics().count(Metric::InternalNodesProcessed);
        }
        kind => panic!("block {} is not a tree node: {:?}", child.block_id, kind),
    }
    Ok(())
}

// visit each child on the pool and wait for all of them.
fn fan_out<P: TraversalPolicy + 'static>(
    txn: &Transaction,
    policy: &Arc<P>,
    children: Vec<Child>,
    thread_pool: &ThreadPool,
) -> Result<()> {
    let n = children.len();
    tracing::trace!(tasks = n, "fan out");
    let (tx, rx) = crossbeam_channel::bounded(n);
    for child in children {
        let txn = txn.clone();
        let policy = policy.clone();
        spawn_task(
            thread_pool,
            move || process_node(&txn, &policy, child, None),
            tx.clone(),
        );
    }

    join_tasks(&rx, n).into_iter().collect()
}

fn is_subset(selected: &[Child], children: &[Child]) -> bool {
    let all: BlockIdSet = children.iter().map(|c| c.block_id).collect();
    let selected: BlockIdSet = selected.iter().map(|c| c.block_id).collect();
    selected.is_subset(&all)
}
