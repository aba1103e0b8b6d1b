//! A handle to one tree.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use sweeptree_core::{AccessMode, BlockId, OrderToken, ReplicationTimestamp};
use threadpool::ThreadPool;

use crate::{
    btree::{
        ops::{
            self, BulkLoadParams, BulkLoadStats, DeleteAllKeys, DeletionSummary, RangeScan,
            TraversalPolicy,
        },
        superblock, Key, Superblock,
    },
    cache::{Cache, CommitOutput, Transaction},
    order::{OrderCheckpoint, OrderSink, OrderSource},
    Options,
};

/// The admission path of write operations.
struct Admission {
    pre_begin_sink: OrderSink,
    pre_begin_write_source: OrderSource,
    post_begin_checkpoint: OrderCheckpoint,
}

/// A tree stored in a [`Cache`], identified by its superblock.
///
/// Write operations are admitted in the order of the tokens they are given.
pub struct BtreeSlice {
    cache: Cache,
    superblock: BlockId,
    admission: Mutex<Admission>,
    traversal_tp: Option<ThreadPool>,
}

impl BtreeSlice {
    /// Create a new, empty tree in the cache.
    pub fn create(cache: Cache, o: &Options) -> Result<Self> {
        let txn = cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::DISTANT_PAST,
            OrderToken::IGNORE,
        );
        let mut page = txn.allocate()?;
        superblock::init(page.data_mut());
        let superblock = page.block_id();
        drop(page);
        txn.commit()?;

        tracing::debug!(%superblock, "created tree");
        Ok(Self::open(cache, superblock, o))
    }

    /// Open the tree of an existing superblock.
    pub fn open(cache: Cache, superblock: BlockId, o: &Options) -> Self {
        let traversal_tp = if o.traversal_concurrency > 1 {
            Some(ThreadPool::with_name(
                "sweeptree-traversal".into(),
                o.traversal_concurrency,
            ))
        } else {
            None
        };
        BtreeSlice {
            cache,
            superblock,
            admission: Mutex::new(Admission {
                pre_begin_sink: OrderSink::new(),
                pre_begin_write_source: OrderSource::new(),
                post_begin_checkpoint: OrderCheckpoint::new("post_begin_transaction"),
            }),
            traversal_tp,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn superblock(&self) -> BlockId {
        self.superblock
    }

    /// The committed root block, or `None` if the tree is empty.
    pub fn root(&self) -> Option<BlockId> {
        let page = self.cache.read_page(self.superblock)?;
        let root = Superblock::new(&page).root_block();
        (!root.is_null()).then_some(root)
    }

    /// Open a transaction for a write operation once `token` is admitted.
    ///
    /// Panics if a later token of the same source was already admitted.
    pub fn begin_write(&self, token: OrderToken, timestamp: ReplicationTimestamp) -> Transaction {
        let admission = self.admission.lock();
        admission.pre_begin_sink.check_out(token.clone());
        let begin_token = admission
            .pre_begin_write_source
            .check_in(format!("{}+begin_transaction_token", token.tag()));
        let txn = self.cache.begin(AccessMode::Write, timestamp, begin_token);
        txn.set_token(admission.post_begin_checkpoint.check_through(token));
        txn
    }

    /// Run a policy over the tree within the given transaction, fanning out over the slice's
    /// traversal workers.
    pub fn traverse<P: TraversalPolicy + 'static>(
        &self,
        txn: &Transaction,
        policy: &Arc<P>,
    ) -> Result<()> {
        ops::traverse(txn, self.superblock, policy, self.traversal_tp.as_ref())
    }

    /// Delete every key of the tree, releasing all of its pages but the superblock.
    ///
    /// This is for backfill: the deletion is not stamped with a replication timestamp and not
    /// recorded anywhere. On error nothing is changed.
    pub fn delete_all_keys_for_backfill(
        &self,
        token: OrderToken,
    ) -> Result<(DeletionSummary, CommitOutput)> {
        self.delete_all_keys_with(token, DeleteAllKeys::new())
    }

    /// Like [`BtreeSlice::delete_all_keys_for_backfill`], with a configured policy.
    pub fn delete_all_keys_with(
        &self,
        token: OrderToken,
        policy: DeleteAllKeys,
    ) -> Result<(DeletionSummary, CommitOutput)> {
        let policy = Arc::new(policy);
        let txn = self.begin_write(token, ReplicationTimestamp::INVALID);
        self.traverse(&txn, &policy)?;
        let output = txn.commit()?;

        let summary = policy.summary();
        tracing::debug!(
            superblock = %self.superblock,
            leaves = summary.leaves_retired,
            internal_nodes = summary.internal_nodes_retired,
            blob_pages = summary.blob_pages_released,
            "deleted all keys"
        );
        Ok((summary, output))
    }

    /// Fill the empty tree with strictly ascending pairs.
    pub fn bulk_load(
        &self,
        token: OrderToken,
        items: impl IntoIterator<Item = (Key, Vec<u8>)>,
        params: BulkLoadParams,
    ) -> Result<BulkLoadStats> {
        let txn = self.begin_write(token, ReplicationTimestamp::DISTANT_PAST);
        let stats = ops::bulk_load(&txn, self.superblock, items, params)?;
        txn.commit()?;
        Ok(stats)
    }

    pub fn lookup(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let txn = self.read_txn();
        ops::lookup(&txn, self.superblock, key)
    }

    /// All pairs with keys in `[start, end)`, in key order.
    pub fn scan(&self, start: Key, end: Option<Key>) -> Result<Vec<(Key, Vec<u8>)>> {
        let policy = Arc::new(RangeScan::new(start, end));
        let txn = self.read_txn();
        self.traverse(&txn, &policy)?;
        Ok(policy.take_pairs())
    }

    fn read_txn(&self) -> Transaction {
        self.cache.begin(
            AccessMode::Read,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        )
    }
}
