//! Build a tree from sorted pairs.
//!
//! Leaves are filled left to right, then each level of internal nodes is built over the one
//! below until a single root remains. The tree must be empty beforehand: this never splits or
//! merges live nodes.

use anyhow::Result;
use sweeptree_core::{AccessMode, BlockId};

use crate::{
    btree::{
        blob,
        internal::{InternalBuilder, MAX_CHILDREN},
        leaf::{pair_footprint, LeafBuilder, ValueRef, LEAF_NODE_BODY_SIZE},
        superblock, Key, Superblock,
    },
    cache::Transaction,
};

/// Shape of the tree built by [`bulk_load`].
#[derive(Debug, Clone, Copy)]
pub struct BulkLoadParams {
    /// The maximum number of pairs per leaf. Leaves also close early when full.
    pub leaf_capacity: usize,
    /// The maximum number of children per internal node.
    pub fanout: usize,
}

impl Default for BulkLoadParams {
    fn default() -> Self {
        BulkLoadParams {
            leaf_capacity: usize::MAX,
            fanout: MAX_CHILDREN,
        }
    }
}

/// What [`bulk_load`] created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkLoadStats {
    pub leaves: Vec<BlockId>,
    pub internal_nodes: Vec<BlockId>,
    pub blob_pages: usize,
    /// The number of node levels, 0 for an empty tree.
    pub height: usize,
}

enum Stored {
    Inline(Vec<u8>),
    Blob([u8; blob::BLOB_REF_SIZE]),
}

impl Stored {
    fn len(&self) -> usize {
        match self {
            Stored::Inline(v) => v.len(),
            Stored::Blob(r) => r.len(),
        }
    }

    fn value_ref(&self) -> ValueRef {
        match self {
            Stored::Inline(v) => ValueRef::Inline(v),
            Stored::Blob(r) => ValueRef::Blob(r),
        }
    }
}

/// Load strictly ascending pairs into the empty tree of the given superblock.
///
/// Panics if the tree is not empty, the keys are not strictly ascending or the parameters are
/// out of range.
pub fn bulk_load(
    txn: &Transaction,
    superblock_id: BlockId,
    items: impl IntoIterator<Item = (Key, Vec<u8>)>,
    params: BulkLoadParams,
) -> Result<BulkLoadStats> {
    assert!(params.leaf_capacity > 0);
    assert!((2..=MAX_CHILDREN).contains(&params.fanout));

    let mut sb_page = txn.acquire(superblock_id, AccessMode::Write)?;
    assert!(
        Superblock::new(sb_page.data()).is_empty(),
        "bulk load into a non-empty tree"
    );

    let mut stats = BulkLoadStats::default();
    // (lowest key, block) of every node of the level being built.
    let mut level: Vec<(Key, BlockId)> = Vec::new();
    let mut pending: Vec<(Key, Stored)> = Vec::new();
    let mut pending_size = 0;
    let mut last_key: Option<Key> = None;

    for (key, value) in items {
        if let Some(last) = last_key {
            assert!(key > last, "bulk load keys must be strictly ascending");
        }
        last_key = Some(key);

        let stored = if blob::is_blob_sized(value.len()) {
            let blob_ref = blob::write(txn, &value)?;
            stats.blob_pages += blob::page_count(txn, &blob_ref)?;
            Stored::Blob(blob_ref.encode())
        } else {
            Stored::Inline(value)
        };

        let footprint = pair_footprint(stored.len());
        if pending.len() == params.leaf_capacity
            || pending_size + footprint > LEAF_NODE_BODY_SIZE
        {
            level.push(write_leaf(txn, &pending, &mut stats)?);
            pending.clear();
            pending_size = 0;
        }
        pending_size += footprint;
        pending.push((key, stored));
    }
    if !pending.is_empty() {
        level.push(write_leaf(txn, &pending, &mut stats)?);
    }

    if level.is_empty() {
        return Ok(stats);
    }
    stats.height = 1;

    while level.len() > 1 {
        let mut parents = Vec::with_capacity(level.len().div_ceil(params.fanout));
        for chunk in level.chunks(params.fanout) {
            let mut page = txn.allocate()?;
            let mut builder = InternalBuilder::new(page.data_mut());
            for &(separator, child) in chunk {
                builder.push(separator, child);
            }
            stats.internal_nodes.push(page.block_id());
            parents.push((chunk[0].0, page.block_id()));
        }
        level = parents;
        stats.height += 1;
    }

    superblock::set_root_block(sb_page.data_mut(), level[0].1);
    tracing::debug!(
        leaves = stats.leaves.len(),
        internal_nodes = stats.internal_nodes.len(),
        height = stats.height,
        "bulk load"
    );
    Ok(stats)
}

fn write_leaf(
    txn: &Transaction,
    pairs: &[(Key, Stored)],
    stats: &mut BulkLoadStats,
) -> Result<(Key, BlockId)> {
    let mut page = txn.allocate()?;
    let mut builder = LeafBuilder::new(page.data_mut());
    for (key, stored) in pairs {
        builder.push(*key, stored.value_ref());
    }
    stats.leaves.push(page.block_id());
    Ok((pairs[0].0, page.block_id()))
}

#[cfg(test)]
mod tests {
    use super::{bulk_load, BulkLoadParams};
    use crate::{
        btree::{ops::lookup, superblock, Superblock},
        cache::Cache,
        Options,
    };
    use sweeptree_core::{AccessMode, BlockId, OrderToken, ReplicationTimestamp};

    fn key(i: u32) -> [u8; 32] {
        let mut k = [0u8; 32];
        k[..4].copy_from_slice(&i.to_be_bytes());
        k
    }

    fn setup() -> (Cache, BlockId) {
        let mut o = Options::new();
        o.cache_pages(1024);
        let cache = Cache::new(&o);
        let txn = cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        let mut page = txn.allocate().unwrap();
        superblock::init(page.data_mut());
        let id = page.block_id();
        drop(page);
        txn.commit().unwrap();
        (cache, id)
    }

    #[test]
    fn three_level_shape() {
        let (cache, sb) = setup();
        let txn = cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        let items = (0..8).map(|i| (key(i), vec![i as u8; 4]));
        let stats = bulk_load(
            &txn,
            sb,
            items,
            BulkLoadParams {
                leaf_capacity: 2,
                fanout: 2,
            },
        )
        .unwrap();
        assert_eq!(stats.leaves.len(), 4);
        assert_eq!(stats.internal_nodes.len(), 3);
        assert_eq!(stats.height, 3);
        txn.commit().unwrap();

        let txn = cache.begin(
            AccessMode::Read,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        for i in 0..8 {
            assert_eq!(lookup(&txn, sb, &key(i)).unwrap(), Some(vec![i as u8; 4]));
        }
        assert_eq!(lookup(&txn, sb, &key(8)).unwrap(), None);
    }

    #[test]
    fn large_values_become_blobs() {
        let (cache, sb) = setup();
        let txn = cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        let big = vec![0xAB; 5000];
        let stats = bulk_load(
            &txn,
            sb,
            vec![(key(1), b"a".to_vec()), (key(2), big.clone())],
            BulkLoadParams::default(),
        )
        .unwrap();
        assert_eq!(stats.blob_pages, 2);
        assert_eq!(stats.height, 1);
        assert_eq!(lookup(&txn, sb, &key(2)).unwrap(), Some(big));
    }

    #[test]
    fn nothing_to_load_leaves_tree_empty() {
        let (cache, sb) = setup();
        let txn = cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        let stats = bulk_load(&txn, sb, Vec::new(), BulkLoadParams::default()).unwrap();
        assert_eq!(stats.height, 0);
        txn.commit().unwrap();
        assert!(Superblock::new(&cache.read_page(sb).unwrap()).is_empty());
    }

    #[test]
    #[should_panic]
    fn unsorted_keys_panic() {
        let (cache, sb) = setup();
        let txn = cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        let _ = bulk_load(
            &txn,
            sb,
            vec![(key(2), vec![]), (key(1), vec![])],
            BulkLoadParams::default(),
        );
    }
}
