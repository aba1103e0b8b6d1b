/// Here is the layout of a leaf node:
///
/// ```rust,ignore
/// kind: u8 // PageKind::Leaf
/// padding: u8
/// npairs: u16
/// frontmost: u16 // offset of the lowest byte used by a pair
/// pair_offsets: [u16; npairs]
/// padding: [u8] // empty space between pair_offsets and pairs
/// pairs: [Pair; npairs]
/// ```
///
/// | header | [offset; npairs] | ---- | [Pair; npairs] |
///
/// A pair is `(key: [u8; 32], flags: u8, len: u16, value: [u8; len])`. When bit 0 of `flags` is
/// set, `value` is a blob reference rather than the value itself.
///
/// Pair offsets are kept in key order, but the pairs they point to may live anywhere in the
/// pair region, so that a pair can be added or removed without shifting all bytes. `npairs` is
/// authoritative: bytes of the pair region which no offset points to are garbage.
use crate::btree::{blob::BLOB_REF_SIZE, Key, PageKind};
use sweeptree_core::page::PAGE_SIZE;

const NPAIRS_OFFSET: usize = 2;
const FRONTMOST_OFFSET: usize = 4;
const LEAF_HEADER_SIZE: usize = 6;

const PAIR_HEADER_SIZE: usize = 32 + 1 + 2;
const BLOB_FLAG: u8 = 1;

/// The largest value stored directly in a leaf. Larger values are stored as blobs.
pub const MAX_INLINE_VALUE_SIZE: usize = 250;

/// The size of the leaf node body: everything excluding the mandatory header.
pub const LEAF_NODE_BODY_SIZE: usize = PAGE_SIZE - LEAF_HEADER_SIZE;

/// The value of a pair, as stored in the leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef<'a> {
    /// The value bytes.
    Inline(&'a [u8]),
    /// An encoded blob reference.
    Blob(&'a [u8]),
}

impl<'a> ValueRef<'a> {
    pub fn is_blob(&self) -> bool {
        matches!(self, ValueRef::Blob(_))
    }

    /// The bytes stored in the leaf.
    pub fn raw(&self) -> &'a [u8] {
        match self {
            ValueRef::Inline(raw) | ValueRef::Blob(raw) => raw,
        }
    }
}

/// A key and its value reference.
#[derive(Debug, Clone, Copy)]
pub struct Pair<'a> {
    pub key: Key,
    pub value: ValueRef<'a>,
}

/// A view over a leaf page.
pub struct LeafNode<'a> {
    inner: &'a [u8],
}

impl<'a> LeafNode<'a> {
    /// Panics if the page is not a leaf.
    pub fn new(page: &'a [u8]) -> Self {
        assert_eq!(PageKind::of(page), Some(PageKind::Leaf), "page is not a leaf");
        let leaf = LeafNode { inner: page };
        assert!(
            LEAF_HEADER_SIZE + leaf.npairs() * 2 <= leaf.frontmost(),
            "malformed leaf: pair offsets overlap pairs"
        );
        leaf
    }

    pub fn npairs(&self) -> usize {
        read_u16(self.inner, NPAIRS_OFFSET) as usize
    }

    fn frontmost(&self) -> usize {
        read_u16(self.inner, FRONTMOST_OFFSET) as usize
    }

    pub fn pair_offset(&self, i: usize) -> usize {
        assert!(i < self.npairs());
        read_u16(self.inner, LEAF_HEADER_SIZE + i * 2) as usize
    }

    pub fn pair(&self, i: usize) -> Pair<'a> {
        let offset = self.pair_offset(i);
        decode_pair(self.inner, offset)
    }

    pub fn key(&self, i: usize) -> Key {
        self.pair(i).key
    }

    /// Iterate all pairs in key order.
    pub fn pairs(&self) -> impl Iterator<Item = Pair<'a>> + '_ {
        (0..self.npairs()).map(move |i| self.pair(i))
    }

    /// Look for the key. Same semantics as std `binary_search`.
    pub fn search(&self, key: &Key) -> Result<usize, usize> {
        let mut low = 0;
        let mut high = self.npairs();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key(mid).cmp(key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Err(low)
    }

    pub fn get(&self, key: &Key) -> Option<ValueRef<'a>> {
        self.search(key).ok().map(|i| self.pair(i).value)
    }

    /// The number of unused bytes between the pair offsets and the pairs.
    pub fn free_space(&self) -> usize {
        self.frontmost() - LEAF_HEADER_SIZE - self.npairs() * 2
    }
}

/// Overwrite the blob reference of the `i`th pair in place.
///
/// Blob references have a fixed size, so this never moves bytes.
///
/// Panics if the pair does not hold a blob reference.
pub fn set_blob_ref(page: &mut [u8], i: usize, blob_ref: &[u8]) {
    assert_eq!(blob_ref.len(), BLOB_REF_SIZE);
    let offset = LeafNode::new(page).pair_offset(i);
    let flags = page[offset + 32];
    assert!(flags & BLOB_FLAG != 0, "pair {} does not hold a blob", i);
    let start = offset + PAIR_HEADER_SIZE;
    page[start..start + BLOB_REF_SIZE].copy_from_slice(blob_ref);
}

/// Writes pairs into a fresh leaf page, in key order.
pub struct LeafBuilder<'a> {
    page: &'a mut [u8],
    npairs: usize,
    frontmost: usize,
    last_key: Option<Key>,
}

impl<'a> LeafBuilder<'a> {
    /// Format the page as an empty leaf.
    pub fn new(page: &'a mut [u8]) -> Self {
        assert_eq!(page.len(), PAGE_SIZE);
        page[0] = PageKind::Leaf.byte();
        page[1] = 0;
        write_u16(page, NPAIRS_OFFSET, 0);
        write_u16(page, FRONTMOST_OFFSET, PAGE_SIZE as u16);
        LeafBuilder {
            page,
            npairs: 0,
            frontmost: PAGE_SIZE,
            last_key: None,
        }
    }

    /// Whether a pair with a value of `value_len` stored bytes fits.
    pub fn fits(&self, value_len: usize) -> bool {
        let needed = pair_footprint(value_len);
        let used = LEAF_HEADER_SIZE + self.npairs * 2;
        used + needed <= self.frontmost
    }

    pub fn npairs(&self) -> usize {
        self.npairs
    }

    /// Append a pair. Keys must be pushed in strictly ascending order.
    ///
    /// Panics if the pair does not fit or the key is out of order.
    pub fn push(&mut self, key: Key, value: ValueRef) {
        if let Some(last) = self.last_key {
            assert!(key > last, "leaf keys must be strictly ascending");
        }
        let (flags, raw) = match value {
            ValueRef::Inline(raw) => {
                assert!(raw.len() <= MAX_INLINE_VALUE_SIZE, "inline value too large");
                (0, raw)
            }
            ValueRef::Blob(raw) => {
                assert_eq!(raw.len(), BLOB_REF_SIZE);
                (BLOB_FLAG, raw)
            }
        };
        assert!(self.fits(raw.len()), "pair does not fit in the leaf");

        let offset = self.frontmost - pair_size(raw.len());
        self.page[offset..offset + 32].copy_from_slice(&key);
        self.page[offset + 32] = flags;
        write_u16(self.page, offset + 33, raw.len() as u16);
        self.page[offset + PAIR_HEADER_SIZE..][..raw.len()].copy_from_slice(raw);

        write_u16(
            self.page,
            LEAF_HEADER_SIZE + self.npairs * 2,
            offset as u16,
        );
        self.npairs += 1;
        self.frontmost = offset;
        write_u16(self.page, NPAIRS_OFFSET, self.npairs as u16);
        write_u16(self.page, FRONTMOST_OFFSET, offset as u16);
        self.last_key = Some(key);
    }
}

fn pair_size(value_len: usize) -> usize {
    PAIR_HEADER_SIZE + value_len
}

/// The leaf body space taken by a pair with `value_len` stored value bytes, offset included.
pub fn pair_footprint(value_len: usize) -> usize {
    pair_size(value_len) + 2
}

fn decode_pair(page: &[u8], offset: usize) -> Pair<'_> {
    let mut key = [0u8; 32];
    key.copy_from_slice(&page[offset..offset + 32]);
    let flags = page[offset + 32];
    let len = read_u16(page, offset + 33) as usize;
    let start = offset + PAIR_HEADER_SIZE;
    assert!(start + len <= PAGE_SIZE, "malformed leaf: pair overflows page");
    let raw = &page[start..start + len];
    let value = if flags & BLOB_FLAG != 0 {
        ValueRef::Blob(raw)
    } else {
        ValueRef::Inline(raw)
    };
    Pair { key, value }
}

fn read_u16(page: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([page[offset], page[offset + 1]])
}

fn write_u16(page: &mut [u8], offset: usize, val: u16) {
    page[offset..offset + 2].copy_from_slice(&val.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{set_blob_ref, LeafBuilder, LeafNode, ValueRef, MAX_INLINE_VALUE_SIZE};
    use crate::btree::blob::BLOB_REF_SIZE;
    use quickcheck::{QuickCheck, TestResult};
    use sweeptree_core::page::Page;

    fn key(i: u8) -> [u8; 32] {
        let mut k = [0u8; 32];
        k[31] = i;
        k
    }

    #[test]
    fn pairs_come_back_in_order() {
        let mut page = Page::zeroed();
        let mut builder = LeafBuilder::new(&mut page);
        builder.push(key(1), ValueRef::Inline(b"one"));
        builder.push(key(2), ValueRef::Blob(&[7; BLOB_REF_SIZE]));
        builder.push(key(3), ValueRef::Inline(b""));

        let leaf = LeafNode::new(&page);
        assert_eq!(leaf.npairs(), 3);
        let pairs: Vec<_> = leaf.pairs().collect();
        assert_eq!(pairs[0].key, key(1));
        assert_eq!(pairs[0].value, ValueRef::Inline(b"one"));
        assert!(pairs[1].value.is_blob());
        assert_eq!(pairs[2].value, ValueRef::Inline(b""));
        assert_eq!(leaf.get(&key(2)).map(|v| v.raw().len()), Some(BLOB_REF_SIZE));
        assert_eq!(leaf.search(&key(0)), Err(0));
        assert_eq!(leaf.search(&key(4)), Err(3));
    }

    #[test]
    fn blob_ref_rewritten_in_place() {
        let mut page = Page::zeroed();
        let mut builder = LeafBuilder::new(&mut page);
        builder.push(key(1), ValueRef::Inline(b"x"));
        builder.push(key(2), ValueRef::Blob(&[1; BLOB_REF_SIZE]));

        set_blob_ref(&mut page, 1, &[9; BLOB_REF_SIZE]);
        let leaf = LeafNode::new(&page);
        assert_eq!(leaf.pair(1).value, ValueRef::Blob(&[9; BLOB_REF_SIZE]));
        assert_eq!(leaf.pair(0).value, ValueRef::Inline(b"x"));
    }

    #[test]
    #[should_panic]
    fn set_blob_ref_on_inline_pair_panics() {
        let mut page = Page::zeroed();
        LeafBuilder::new(&mut page).push(key(1), ValueRef::Inline(b"x"));
        set_blob_ref(&mut page, 0, &[0; BLOB_REF_SIZE]);
    }

    #[test]
    #[should_panic]
    fn out_of_order_keys_panic() {
        let mut page = Page::zeroed();
        let mut builder = LeafBuilder::new(&mut page);
        builder.push(key(2), ValueRef::Inline(b""));
        builder.push(key(1), ValueRef::Inline(b""));
    }

    #[test]
    fn fill_until_full() {
        fn prop(value_len: usize) -> TestResult {
            let value_len = value_len % (MAX_INLINE_VALUE_SIZE + 1);
            let value = vec![0xEE; value_len];
            let mut page = Page::zeroed();
            let mut builder = LeafBuilder::new(&mut page);
            let mut n = 0u32;
            while builder.fits(value_len) {
                let mut k = [0u8; 32];
                k[28..].copy_from_slice(&n.to_be_bytes());
                builder.push(k, ValueRef::Inline(&value));
                n += 1;
            }

            let leaf = LeafNode::new(&page);
            TestResult::from_bool(
                leaf.npairs() == n as usize
                    && leaf.pairs().all(|p| p.value == ValueRef::Inline(&value)),
            )
        }

        QuickCheck::new()
            .tests(200)
            .quickcheck(prop as fn(usize) -> TestResult);
    }
}
