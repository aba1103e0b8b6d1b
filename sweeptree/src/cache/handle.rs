use std::sync::Arc;

use parking_lot::{lock_api::ArcRwLockReadGuard, ArcMutexGuard, RawMutex, RawRwLock};
use sweeptree_core::{page::Page, AccessMode, BlockId};

use super::{DirtyPage, TxnInner};

pub(super) type ReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;
pub(super) type DirtyGuard = ArcMutexGuard<RawMutex, DirtyPage>;

/// A scoped, access-mode-qualified handle to one page within a transaction.
///
/// Read handles hold the page's shared lock until they are dropped. Write handles view the
/// transaction's private copy of the page; the page's exclusive lock belongs to the transaction
/// and outlives the handle. Either way, release happens on drop, on every exit path.
pub struct PageHandle {
    block_id: BlockId,
    mode: AccessMode,
    inner: HandleInner,
    txn: Arc<TxnInner>,
}

enum HandleInner {
    /// An unlocked view of the committed page.
    Snapshot(Arc<Page>),
    /// A locked view of the committed page.
    Read { _guard: ReadGuard, page: Arc<Page> },
    /// The transaction's private copy.
    Owned(DirtyGuard),
}

impl PageHandle {
    pub(super) fn snapshot(block_id: BlockId, page: Arc<Page>, txn: Arc<TxnInner>) -> Self {
        PageHandle {
            block_id,
            mode: AccessMode::None,
            inner: HandleInner::Snapshot(page),
            txn,
        }
    }

    pub(super) fn read(
        block_id: BlockId,
        guard: ReadGuard,
        page: Arc<Page>,
        txn: Arc<TxnInner>,
    ) -> Self {
        PageHandle {
            block_id,
            mode: AccessMode::Read,
            inner: HandleInner::Read {
                _guard: guard,
                page,
            },
            txn,
        }
    }

    pub(super) fn owned(
        block_id: BlockId,
        mode: AccessMode,
        guard: DirtyGuard,
        txn: Arc<TxnInner>,
    ) -> Self {
        PageHandle {
            block_id,
            mode,
            inner: HandleInner::Owned(guard),
            txn,
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// The mode this handle was acquired with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn data(&self) -> &[u8] {
        match &self.inner {
            HandleInner::Snapshot(page) => &page[..],
            HandleInner::Read { page, .. } => &page[..],
            HandleInner::Owned(dirty) => &dirty.page[..],
        }
    }

    /// Mutable access to the page. The change becomes visible to other transactions on commit.
    ///
    /// Panics if the handle was not acquired for write or the page has been retired.
    pub fn data_mut(&mut self) -> &mut [u8] {
        assert!(
            self.mode.is_write(),
            "page {} is not held for write",
            self.block_id
        );
        match &mut self.inner {
            HandleInner::Owned(dirty) => {
                assert!(!dirty.retired, "page {} is retired", self.block_id);
                dirty.written = true;
                &mut dirty.page[..]
            }
            _ => unreachable!("write handles always own a private copy"),
        }
    }

    /// Mark the page as no longer part of the live structure.
    ///
    /// The page stays readable through this handle. It is physically reclaimed when the
    /// transaction commits and discarded, along with the mark, if it rolls back.
    ///
    /// Panics if the handle was not acquired for write or the page was already retired.
    pub fn mark_retired(&mut self) {
        assert!(
            self.mode.is_write(),
            "page {} is not held for write",
            self.block_id
        );
        let HandleInner::Owned(ref mut dirty) = self.inner else {
            unreachable!("write handles always own a private copy")
        };
        assert!(!dirty.retired, "page {} retired twice", self.block_id);
        dirty.retired = true;
        self.txn.state.lock().retired.push(self.block_id);
        tracing::trace!(block = %self.block_id, "retired");
    }

    pub fn is_retired(&self) -> bool {
        match &self.inner {
            HandleInner::Owned(dirty) => dirty.retired,
            _ => false,
        }
    }
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("block_id", &self.block_id)
            .field("mode", &self.mode)
            .finish()
    }
}
