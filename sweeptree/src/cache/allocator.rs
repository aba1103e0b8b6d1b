//! Block allocation for the cache.
//!
//! Blocks are handed out LIFO from a free-list, falling back to a bump pointer. An allocation is
//! only a reservation until the transaction which made it commits: a rolled-back transaction
//! returns its reservations to the free-list, a committed one makes them live. Retired blocks
//! are returned to the free-list when the retiring transaction commits.

use anyhow::bail;
use sweeptree_core::{BlockId, NULL_BLOCK_ID};

pub struct Allocator {
    /// the next never-used block id.
    bump: BlockId,
    /// the highest block id which may be handed out, plus one.
    max_bump: BlockId,
    /// blocks which may be reused.
    free_list: Vec<BlockId>,
    /// the number of live (committed or reserved) blocks.
    live: usize,
}

impl Allocator {
    /// Create an allocator which can hold at most `capacity` blocks.
    pub fn new(capacity: u32) -> Self {
        Allocator {
            // block 0 is the null block and is never allocated.
            bump: BlockId(NULL_BLOCK_ID.0 + 1),
            max_bump: BlockId(capacity.saturating_add(1)),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Reserve a block.
    ///
    /// Returns an error if the cache is exhausted.
    pub fn allocate(&mut self) -> anyhow::Result<BlockId> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                if self.bump >= self.max_bump {
                    bail!(
                        "cache exhausted: all {} blocks are in use",
                        self.max_bump.0 - 1
                    );
                }
                let id = self.bump;
                self.bump = BlockId(self.bump.0 + 1);
                id
            }
        };
        self.live += 1;
        Ok(id)
    }

    /// Return blocks to the free-list, either because they were retired by a committed
    /// transaction or because they were reserved by a rolled-back one.
    pub fn release(&mut self, ids: impl IntoIterator<Item = BlockId>) {
        for id in ids {
            assert!(!id.is_null());
            assert!(id < self.bump, "released block {} was never allocated", id);
            self.live -= 1;
            self.free_list.push(id);
        }
    }

    /// The number of live blocks.
    pub fn live(&self) -> usize {
        self.live
    }
}
