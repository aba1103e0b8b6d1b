use std::collections::HashMap;

use sweeptree::{
    btree::{
        blob::{self, BlobRef},
        leaf::ValueRef,
        InternalNode, LeafNode, PageKind, Superblock,
    },
    order::OrderSource,
    AccessMode, BlockId, BlockIdSet, BtreeSlice, BulkLoadParams, BulkLoadStats, Cache,
    CommitOutput, DeletionSummary, Key, OrderToken, Options, ReplicationTimestamp,
};

lazy_static::lazy_static! {
    #[allow(dead_code)]
    /// A value spanning two data pages.
    pub static ref TWO_PAGE_VALUE: Vec<u8> = (0..6000).map(|i| (i % 256) as u8).collect();
}

/// Keys in ascending order of `i`.
pub fn seq_key(i: u64) -> Key {
    let mut key = [0; 32];
    key[..8].copy_from_slice(&i.to_be_bytes());
    key
}

/// A value of pseudo-random bytes, seeded with the id.
pub fn value(id: u64, len: usize) -> Vec<u8> {
    use rand::{RngCore as _, SeedableRng as _};
    let mut seed = [0; 16];
    seed[0..8].copy_from_slice(&id.to_le_bytes());
    let mut rng = rand_pcg::Lcg64Xsh32::from_seed(seed);
    let mut value = vec![0; len];
    rng.fill_bytes(&mut value);
    value
}

/// The pages of a committed tree.
#[derive(Debug, Default)]
pub struct Reachable {
    pub leaves: BlockIdSet,
    pub internal_nodes: BlockIdSet,
    pub blob_pages: BlockIdSet,
    /// child to parent.
    pub parents: HashMap<BlockId, BlockId>,
}

#[allow(dead_code)]
impl Reachable {
    pub fn all(&self) -> BlockIdSet {
        let mut all = self.leaves.clone();
        all.extend(self.internal_nodes.iter());
        all.extend(self.blob_pages.iter());
        all
    }

    pub fn nodes(&self) -> BlockIdSet {
        let mut nodes = self.leaves.clone();
        nodes.extend(self.internal_nodes.iter());
        nodes
    }
}

pub struct Test {
    pub slice: BtreeSlice,
    source: OrderSource,
}

#[allow(dead_code)]
impl Test {
    pub fn new(traversal_concurrency: usize) -> Self {
        Self::new_with_params(traversal_concurrency, 1 << 14)
    }

    pub fn new_with_params(traversal_concurrency: usize, cache_pages: u32) -> Self {
        sweeptree::logging::init();
        let mut o = Options::new();
        o.traversal_concurrency(traversal_concurrency);
        o.cache_pages(cache_pages);
        o.metrics(true);
        let cache = Cache::new(&o);
        let slice = BtreeSlice::create(cache, &o).unwrap();
        Self {
            slice,
            source: OrderSource::new(),
        }
    }

    pub fn cache(&self) -> &Cache {
        self.slice.cache()
    }

    pub fn token(&self, tag: &str) -> OrderToken {
        self.source.check_in(tag)
    }

    pub fn load(&self, items: Vec<(Key, Vec<u8>)>, params: BulkLoadParams) -> BulkLoadStats {
        let token = self.token("load");
        self.slice.bulk_load(token, items, params).unwrap()
    }

    /// Load `n` pairs with small inline values.
    pub fn load_seq(&self, n: u64, params: BulkLoadParams) -> BulkLoadStats {
        let items = (0..n).map(|i| (seq_key(i), value(i, 16))).collect();
        self.load(items, params)
    }

    pub fn delete_all(&self) -> anyhow::Result<(DeletionSummary, CommitOutput)> {
        let token = self.token("backfill");
        self.slice.delete_all_keys_for_backfill(token)
    }

    pub fn root(&self) -> Option<BlockId> {
        self.slice.root()
    }

    /// Walk the committed tree.
    pub fn reachable(&self) -> Reachable {
        let mut reachable = Reachable::default();
        let txn = self.cache().begin(
            AccessMode::Read,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        );
        let sb = txn.acquire(self.slice.superblock(), AccessMode::Read).unwrap();
        let root = Superblock::new(sb.data()).root_block();
        drop(sb);
        if root.is_null() {
            return reachable;
        }

        let mut stack = vec![root];
        while let Some(block_id) = stack.pop() {
            let page = txn.acquire(block_id, AccessMode::Read).unwrap();
            match PageKind::of(page.data()) {
                Some(PageKind::Internal) => {
                    reachable.internal_nodes.insert(block_id);
                    let node = InternalNode::new(page.data());
                    for i in 0..node.n() {
                        reachable.parents.insert(node.child(i), block_id);
                        stack.push(node.child(i));
                    }
                }
                Some(PageKind::Leaf) => {
                    reachable.leaves.insert(block_id);
                    for pair in LeafNode::new(page.data()).pairs() {
                        if let ValueRef::Blob(raw) = pair.value {
                            let blob_ref = BlobRef::decode(raw);
                            if blob_ref.is_indirect() {
                                reachable.blob_pages.extend(blob_ref.pointers().iter().copied());
                            }
                            let data = blob::data_pages(&txn, &blob_ref).unwrap();
                            reachable.blob_pages.extend(data);
                        }
                    }
                }
                kind => panic!("unexpected page kind {:?}", kind),
            }
        }
        reachable
    }

    /// Assert that every child was retired before its parent.
    pub fn assert_bottom_up(&self, reachable: &Reachable, retired: &[BlockId]) {
        let position: HashMap<BlockId, usize> =
            retired.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for (child, parent) in &reachable.parents {
            assert!(
                position[child] < position[parent],
                "parent {} retired before child {}",
                parent,
                child
            );
        }
    }
}
