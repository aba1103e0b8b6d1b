//! The transactional buffer cache.
//!
//! The cache holds fixed-size pages identified by [`BlockId`] and groups mutations into
//! transactions which commit atomically: a transaction works on private copies of the pages it
//! acquires for write and on freshly allocated pages, and only on commit are those installed and
//! the retired pages removed, all under one lock of the page table. A transaction which is
//! dropped without committing leaves no trace.
//!
//! Locking: every page has a reader-writer lock. Read acquisitions hold the shared side for the
//! lifetime of the handle. Write acquisitions take the exclusive side on behalf of the
//! transaction and keep it until the transaction ends, so two transactions never write the same
//! page concurrently. Callers acquire pages top-down, parent before child, which keeps
//! concurrent traversals of one tree deadlock-free.
//!
//! This is an in-memory substrate. Eviction and durability are not modelled.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{bail, Context};
use fxhash::FxHashMap;
use parking_lot::{lock_api::ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use sweeptree_core::{
    page::Page, AccessMode, BlockId, BlockIdSet, OrderToken, ReplicationTimestamp,
};

use crate::{
    metrics::{Metric, Metrics},
    Options,
};

use allocator::Allocator;
pub use handle::PageHandle;

mod allocator;
mod handle;

type WriteGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// A shared handle to the page cache. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    shared: Arc<Shared>,
}

struct Shared {
    pages: RwLock<FxHashMap<BlockId, Arc<Slot>>>,
    allocator: Mutex<Allocator>,
    metrics: Metrics,
    next_txn_id: AtomicU64,
}

/// A committed page.
struct Slot {
    lock: Arc<RwLock<()>>,
    data: Mutex<Arc<Page>>,
}

impl Slot {
    fn new(page: Arc<Page>) -> Self {
        Slot {
            lock: Arc::new(RwLock::new(())),
            data: Mutex::new(page),
        }
    }
}

impl Cache {
    /// Create an empty cache.
    pub fn new(o: &Options) -> Self {
        Cache {
            shared: Arc::new(Shared {
                pages: RwLock::new(FxHashMap::default()),
                allocator: Mutex::new(Allocator::new(o.cache_pages)),
                metrics: Metrics::new(o.metrics),
                next_txn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a transaction.
    ///
    /// `mode` bounds the access modes its page acquisitions may request. The timestamp is
    /// recorded with the commit and may be [`ReplicationTimestamp::INVALID`]. The token is the
    /// one under which the transaction was admitted.
    pub fn begin(
        &self,
        mode: AccessMode,
        timestamp: ReplicationTimestamp,
        token: OrderToken,
    ) -> Transaction {
        let id = self.shared.next_txn_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(txn = id, ?mode, ?timestamp, ?token, "begin transaction");
        Transaction {
            inner: Arc::new(TxnInner {
                id,
                cache: self.clone(),
                mode,
                timestamp,
                token: Mutex::new(token),
                state: Mutex::new(TxnState::default()),
            }),
        }
    }

    /// Whether the block holds a committed page.
    pub fn is_allocated(&self, block_id: BlockId) -> bool {
        self.shared.pages.read().contains_key(&block_id)
    }

    /// All blocks holding committed pages.
    pub fn allocated_blocks(&self) -> BlockIdSet {
        self.shared.pages.read().keys().copied().collect()
    }

    /// Read the committed contents of a page, waiting for any writer holding it.
    pub fn read_page(&self, block_id: BlockId) -> Option<Arc<Page>> {
        let slot = self.slot(block_id)?;
        let _guard = slot.lock.read();
        let page = slot.data.lock().clone();
        Some(page)
    }

    /// The number of blocks which are committed or reserved by an open transaction.
    pub fn live_blocks(&self) -> usize {
        self.shared.allocator.lock().live()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    fn slot(&self, block_id: BlockId) -> Option<Arc<Slot>> {
        self.shared.pages.read().get(&block_id).cloned()
    }

    // whether the slot is still the live page for the block. a slot may be removed by a
    // transaction committing while another waits for its lock.
    fn is_live(&self, block_id: BlockId, slot: &Arc<Slot>) -> bool {
        self.shared
            .pages
            .read()
            .get(&block_id)
            .map_or(false, |live| Arc::ptr_eq(live, slot))
    }
}

/// A unit of atomically committed work.
///
/// Cloning yields another reference to the same transaction, used to hand it to the tasks of a
/// fanned-out traversal. It can only be committed once every other reference, including every
/// [`PageHandle`], has been dropped.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

pub(crate) struct TxnInner {
    id: u64,
    cache: Cache,
    mode: AccessMode,
    timestamp: ReplicationTimestamp,
    token: Mutex<OrderToken>,
    state: Mutex<TxnState>,
}

#[derive(Default)]
struct TxnState {
    /// exclusive page locks held until the end of the transaction.
    write_locks: Vec<WriteGuard>,
    /// private copies of pages held for write, including fresh ones.
    dirty: FxHashMap<BlockId, Arc<Mutex<DirtyPage>>>,
    /// blocks reserved by this transaction.
    fresh: Vec<BlockId>,
    /// blocks retired by this transaction, in the order they were marked.
    retired: Vec<BlockId>,
    /// blocks acquired by this transaction, in acquisition order.
    acquired: Vec<BlockId>,
    finished: bool,
}

pub(crate) struct DirtyPage {
    page: Box<Page>,
    written: bool,
    retired: bool,
    fresh: bool,
}

/// The effects of a committed transaction.
#[derive(Debug, Clone)]
pub struct CommitOutput {
    /// Pages whose new contents became visible, including fresh pages.
    pub written: BlockIdSet,
    /// Pages removed from the cache, in the order they were retired.
    pub retired: Vec<BlockId>,
    /// Every acquisition made by the transaction, in order. Repeated acquisitions repeat.
    pub acquired: Vec<BlockId>,
    pub token: OrderToken,
    pub timestamp: ReplicationTimestamp,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mode(&self) -> AccessMode {
        self.inner.mode
    }

    pub fn timestamp(&self) -> ReplicationTimestamp {
        self.inner.timestamp
    }

    pub fn token(&self) -> OrderToken {
        self.inner.token.lock().clone()
    }

    /// Replace the token the transaction is tagged with.
    pub fn set_token(&self, token: OrderToken) {
        *self.inner.token.lock() = token;
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// Acquire a page.
    ///
    /// This blocks while another transaction holds the page in a conflicting mode. Returns an
    /// error if the block holds no committed page or was retired by this transaction.
    ///
    /// Panics if `mode` is stronger than the transaction's mode or the block is the null block.
    pub fn acquire(&self, block_id: BlockId, mode: AccessMode) -> anyhow::Result<PageHandle> {
        assert!(
            self.inner.mode.covers(mode),
            "{:?} acquisition in a {:?} transaction",
            mode,
            self.inner.mode
        );
        assert!(!block_id.is_null(), "acquiring the null block");
        self.inner.cache.metrics().count(Metric::PageAcquisitions);
        tracing::trace!(txn = self.inner.id, block = %block_id, ?mode, "acquire");

        // pages already held for write are served from the private copy, whatever the mode.
        let held = self.inner.state.lock().dirty.get(&block_id).cloned();
        if let Some(dirty) = held {
            let guard = Mutex::lock_arc(&dirty);
            if guard.retired {
                bail!("block {} was retired by this transaction", block_id);
            }
            self.inner.state.lock().acquired.push(block_id);
            let mode = if self.inner.mode.is_write() && mode == AccessMode::None {
                AccessMode::Read
            } else {
                mode
            };
            return Ok(PageHandle::owned(block_id, mode, guard, self.inner.clone()));
        }

        let slot = self
            .inner
            .cache
            .slot(block_id)
            .with_context(|| format!("block {} is not allocated", block_id))?;

        let handle = match mode {
            AccessMode::None => {
                let page = slot.data.lock().clone();
                PageHandle::snapshot(block_id, page, self.inner.clone())
            }
            AccessMode::Read => {
                let guard = slot.lock.read_arc();
                if !self.inner.cache.is_live(block_id, &slot) {
                    bail!("block {} was retired while waiting for it", block_id);
                }
                let page = slot.data.lock().clone();
                PageHandle::read(block_id, guard, page, self.inner.clone())
            }
            AccessMode::Write => {
                let write_guard = slot.lock.write_arc();
                if !self.inner.cache.is_live(block_id, &slot) {
                    bail!("block {} was retired while waiting for it", block_id);
                }
                let page = Box::new(Page::clone(&slot.data.lock()));
                let dirty = Arc::new(Mutex::new(DirtyPage {
                    page,
                    written: false,
                    retired: false,
                    fresh: false,
                }));
                let guard = Mutex::lock_arc(&dirty);

                let mut state = self.inner.state.lock();
                state.write_locks.push(write_guard);
                state.dirty.insert(block_id, dirty);
                drop(state);

                PageHandle::owned(block_id, mode, guard, self.inner.clone())
            }
        };

        self.inner.state.lock().acquired.push(block_id);
        Ok(handle)
    }

    /// Allocate a fresh, zeroed page held for write.
    ///
    /// Returns an error if the cache is exhausted.
    ///
    /// Panics if the transaction is not a write transaction.
    pub fn allocate(&self) -> anyhow::Result<PageHandle> {
        assert!(
            self.inner.mode.is_write(),
            "allocation in a {:?} transaction",
            self.inner.mode
        );
        let block_id = self
            .inner
            .cache
            .shared
            .allocator
            .lock()
            .allocate()
            .context("failed to allocate a page")?;

        let dirty = Arc::new(Mutex::new(DirtyPage {
            page: Box::new(Page::zeroed()),
            written: true,
            retired: false,
            fresh: true,
        }));
        let guard = Mutex::lock_arc(&dirty);

        let mut state = self.inner.state.lock();
        state.fresh.push(block_id);
        state.dirty.insert(block_id, dirty);
        drop(state);

        tracing::trace!(txn = self.inner.id, block = %block_id, "allocate");
        Ok(PageHandle::owned(
            block_id,
            AccessMode::Write,
            guard,
            self.inner.clone(),
        ))
    }

    /// Commit the transaction, atomically making all of its writes and retirements visible.
    ///
    /// Panics if any clone of the transaction or any page handle is still alive.
    pub fn commit(self) -> anyhow::Result<CommitOutput> {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(_) => panic!("transaction committed while handles or tasks still reference it"),
        };
        let metrics = inner.cache.metrics().clone();
        let _timer = metrics.record(Metric::CommitTime);

        let mut state = {
            let mut state = inner.state.lock();
            let taken = std::mem::take(&mut *state);
            state.finished = true;
            taken
        };

        let mut written = BlockIdSet::new();
        let mut released = Vec::new();
        {
            let mut pages = inner.cache.shared.pages.write();
            for (block_id, dirty) in state.dirty.drain() {
                let dirty = match Arc::try_unwrap(dirty) {
                    Ok(dirty) => dirty.into_inner(),
                    Err(_) => panic!("page {} still held at commit", block_id),
                };

                if dirty.retired {
                    if !dirty.fresh {
                        pages.remove(&block_id);
                    }
                    released.push(block_id);
                } else if dirty.fresh {
                    pages.insert(block_id, Arc::new(Slot::new(Arc::from(dirty.page))));
                    written.insert(block_id);
                } else if dirty.written {
                    // UNWRAP: the page is write-locked by this transaction, so it is still live.
                    let slot = pages.get(&block_id).unwrap();
                    *slot.data.lock() = Arc::from(dirty.page);
                    written.insert(block_id);
                }
            }
        }
        // locks are released only once the page table is fully updated.
        drop(std::mem::take(&mut state.write_locks));

        metrics.count_n(Metric::PagesRetired, state.retired.len() as u64);
        inner.cache.shared.allocator.lock().release(released);

        tracing::debug!(
            txn = inner.id,
            written = written.len(),
            retired = state.retired.len(),
            "commit transaction"
        );

        let token = inner.token.lock().clone();
        Ok(CommitOutput {
            written,
            retired: state.retired,
            acquired: state.acquired,
            token,
            timestamp: inner.timestamp,
        })
    }
}

impl Drop for TxnInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.finished {
            return;
        }

        // roll back: private copies are dropped with the state, reservations are returned.
        let fresh = std::mem::take(&mut state.fresh);
        if !state.dirty.is_empty() {
            tracing::warn!(
                txn = self.id,
                pages = state.dirty.len(),
                "transaction dropped without commit, rolling back"
            );
        }
        self.cache.shared.allocator.lock().release(fresh);
    }
}
