mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{seq_key, value, Test};
use parking_lot::Mutex;
use quickcheck::{QuickCheck, TestResult};
use sweeptree::{
    btree::{InternalNode, LeafNode},
    AccessMode, BlockId, BlockIdSet, BulkLoadParams, Child, DeleteAllKeys, OrderToken, PageHandle,
    ReplicationTimestamp, Transaction, TraversalPolicy,
};

/// Checks, while traversing, that every node is post-processed after all of its children.
#[derive(Default)]
struct OrderChecker {
    done: Mutex<BlockIdSet>,
}

impl TraversalPolicy for OrderChecker {
    fn transaction_access_mode(&self) -> AccessMode {
        AccessMode::Read
    }

    fn superblock_access_mode(&self) -> AccessMode {
        AccessMode::Read
    }

    fn node_access_mode(&self) -> AccessMode {
        AccessMode::Read
    }

    fn preprocess_superblock(&self, _: &Transaction, _: &PageHandle) -> Result<()> {
        assert!(self.done.lock().is_empty());
        Ok(())
    }

    fn filter_interesting_children(
        &self,
        _: &Transaction,
        children: Vec<Child>,
    ) -> Result<Vec<Child>> {
        Ok(children)
    }

    fn process_leaf(&self, _: &Transaction, leaf: &mut PageHandle) -> Result<()> {
        assert!(LeafNode::new(leaf.data()).npairs() > 0);
        Ok(())
    }

    fn postprocess_leaf(&self, leaf: &mut PageHandle) {
        assert!(self.done.lock().insert(leaf.block_id()));
    }

    fn postprocess_internal_node(&self, node: &mut PageHandle) {
        let children: Vec<BlockId> = {
            let node = InternalNode::new(node.data());
            (0..node.n()).map(|i| node.child(i)).collect()
        };
        let mut done = self.done.lock();
        for child in children {
            assert!(done.contains(&child), "child {} not done", child);
        }
        assert!(done.insert(node.block_id()));
    }

    fn postprocess_superblock(&self, _: &mut PageHandle) {}
}

/// The identity filter of [`DeleteAllKeys`], recorded.
struct RecordingDelete {
    inner: DeleteAllKeys,
    filtered: Mutex<Vec<(Vec<Child>, Vec<Child>)>>,
}

impl TraversalPolicy for RecordingDelete {
    fn transaction_access_mode(&self) -> AccessMode {
        self.inner.transaction_access_mode()
    }

    fn superblock_access_mode(&self) -> AccessMode {
        self.inner.superblock_access_mode()
    }

    fn node_access_mode(&self) -> AccessMode {
        self.inner.node_access_mode()
    }

    fn preprocess_superblock(&self, txn: &Transaction, sb: &PageHandle) -> Result<()> {
        self.inner.preprocess_superblock(txn, sb)
    }

    fn filter_interesting_children(
        &self,
        txn: &Transaction,
        children: Vec<Child>,
    ) -> Result<Vec<Child>> {
        let out = self.inner.filter_interesting_children(txn, children.clone())?;
        self.filtered.lock().push((children, out.clone()));
        Ok(out)
    }

    fn process_leaf(&self, txn: &Transaction, leaf: &mut PageHandle) -> Result<()> {
        self.inner.process_leaf(txn, leaf)
    }

    fn postprocess_leaf(&self, leaf: &mut PageHandle) {
        self.inner.postprocess_leaf(leaf)
    }

    fn postprocess_internal_node(&self, node: &mut PageHandle) {
        self.inner.postprocess_internal_node(node)
    }

    fn postprocess_superblock(&self, sb: &mut PageHandle) {
        self.inner.postprocess_superblock(sb)
    }
}

fn read_txn(t: &Test) -> Transaction {
    t.cache().begin(
        AccessMode::Read,
        ReplicationTimestamp::INVALID,
        OrderToken::IGNORE,
    )
}

#[test]
fn parallel_traversal_is_bottom_up() {
    let t = Test::new(8);
    t.load_seq(2000, BulkLoadParams {
        leaf_capacity: 5,
        fanout: 3,
    });
    let reachable = t.reachable();

    let policy = Arc::new(OrderChecker::default());
    t.slice.traverse(&read_txn(&t), &policy).unwrap();
    assert_eq!(*policy.done.lock(), reachable.nodes());
}

#[test]
fn deletion_filter_is_identity() {
    let t = Test::new(4);
    t.load_seq(200, BulkLoadParams {
        leaf_capacity: 4,
        fanout: 5,
    });
    let policy = Arc::new(RecordingDelete {
        inner: DeleteAllKeys::new(),
        filtered: Mutex::new(Vec::new()),
    });
    let txn = t
        .slice
        .begin_write(t.token("backfill"), ReplicationTimestamp::INVALID);
    t.slice.traverse(&txn, &policy).unwrap();
    txn.commit().unwrap();

    let filtered = policy.filtered.lock();
    assert!(!filtered.is_empty());
    for (input, output) in filtered.iter() {
        assert_eq!(input, output);
    }
    assert!(t.root().is_none());
}

#[test]
fn scan_through_slice() {
    let t = Test::new(4);
    t.load_seq(1000, BulkLoadParams {
        leaf_capacity: 7,
        fanout: 4,
    });
    let pairs = t.slice.scan(seq_key(100), Some(seq_key(350))).unwrap();
    assert_eq!(pairs.len(), 250);
    for (i, (key, v)) in pairs.into_iter().enumerate() {
        let id = 100 + i as u64;
        assert_eq!(key, seq_key(id));
        assert_eq!(v, value(id, 16));
    }
}

#[test]
fn delete_random_trees() {
    fn prop(n: u16, leaf_capacity: u8, fanout: u8, blob_every: u8, concurrency: bool) -> TestResult {
        let n = n as u64 % 600;
        let params = BulkLoadParams {
            leaf_capacity: 1 + leaf_capacity as usize % 16,
            fanout: 2 + fanout as usize % 8,
        };
        let blob_every = 1 + blob_every as u64 % 20;
        let t = Test::new(if concurrency { 4 } else { 1 });

        let items = (0..n)
            .map(|i| {
                let len = if i % blob_every == 0 {
                    300 + (i as usize * 997) % 12_000
                } else {
                    (i % 200) as usize
                };
                (seq_key(i), value(i, len))
            })
            .collect();
        t.load(items, params);
        let reachable = t.reachable();

        let (summary, output) = t.delete_all().unwrap();
        t.assert_bottom_up(&reachable, &output.retired);

        let retired: BlockIdSet = output.retired.iter().copied().collect();
        let mut remaining = BlockIdSet::new();
        remaining.insert(t.slice.superblock());

        TestResult::from_bool(
            retired.len() == output.retired.len()
                && retired == reachable.all()
                && summary.leaves_retired == reachable.leaves.len()
                && summary.internal_nodes_retired == reachable.internal_nodes.len()
                && summary.blob_pages_released == reachable.blob_pages.len()
                && summary.root_cleared == (n > 0)
                && t.root().is_none()
                && t.cache().allocated_blocks() == remaining,
        )
    }

    QuickCheck::new()
        .tests(40)
        .quickcheck(prop as fn(u16, u8, u8, u8, bool) -> TestResult);
}
