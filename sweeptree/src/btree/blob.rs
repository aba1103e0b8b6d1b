//! Blobs store values which are too large to live in a leaf.
//!
//! The leaf holds a fixed-size blob reference; the value itself is chunked into whole data
//! pages. Small blobs point at their data pages directly from the reference. Larger ones point at
//! index pages, each of which points at up to [`INDEX_PAGE_POINTERS`] data pages.
//!
//! The format of a blob reference is:
//! ```rust,ignore
//! value_size: u64
//! depth: u8 // 0: pointers are data pages. 1: pointers are index pages.
//! n_pointers: u8
//! pointers: [u32; MAX_BLOB_REF_POINTERS] // unused pointers are zero
//! ```
//!
//! The format of an index page is:
//! ```rust,ignore
//! kind: u8 // PageKind::BlobIndex
//! padding: u8
//! n_pointers: u16
//! pointers: [u32; n_pointers]
//! ```
//!
//! Data page `i` holds bytes `i * PAGE_SIZE..(i + 1) * PAGE_SIZE` of the value.

use anyhow::ensure;
use sweeptree_core::{page::PAGE_SIZE, AccessMode, BlockId};

use crate::{
    btree::{
        leaf::{ValueRef, MAX_INLINE_VALUE_SIZE},
        PageKind,
    },
    cache::Transaction,
    metrics::Metric,
};

/// The number of pointers which fit in a blob reference.
pub const MAX_BLOB_REF_POINTERS: usize = 8;

/// The encoded size of a blob reference.
pub const BLOB_REF_SIZE: usize = 8 + 1 + 1 + MAX_BLOB_REF_POINTERS * 4;

const INDEX_HEADER_SIZE: usize = 4;

/// The number of data page pointers which fit in an index page.
pub const INDEX_PAGE_POINTERS: usize = (PAGE_SIZE - INDEX_HEADER_SIZE) / 4;

/// The largest value which can be stored as a blob.
pub const MAX_BLOB_VALUE_SIZE: usize = MAX_BLOB_REF_POINTERS * INDEX_PAGE_POINTERS * PAGE_SIZE;

/// A decoded blob reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    value_size: usize,
    depth: u8,
    pointers: Vec<BlockId>,
}

impl BlobRef {
    pub fn decode(raw: &[u8]) -> Self {
        assert_eq!(raw.len(), BLOB_REF_SIZE, "malformed blob reference");
        // UNWRAP: the slice is 8 bytes long.
        let value_size = u64::from_le_bytes(raw[0..8].try_into().unwrap()) as usize;
        let depth = raw[8];
        let n = raw[9] as usize;
        assert!(value_size <= MAX_BLOB_VALUE_SIZE);
        assert!(depth <= 1, "unknown blob depth {}", depth);
        assert!(n <= MAX_BLOB_REF_POINTERS);

        let pointers = raw[10..]
            .chunks(4)
            .take(n)
            .map(BlockId::from_le_slice)
            .collect();
        BlobRef {
            value_size,
            depth,
            pointers,
        }
    }

    pub fn encode(&self) -> [u8; BLOB_REF_SIZE] {
        let mut raw = [0u8; BLOB_REF_SIZE];
        raw[0..8].copy_from_slice(&(self.value_size as u64).to_le_bytes());
        raw[8] = self.depth;
        raw[9] = self.pointers.len() as u8;
        for (pn, slice) in self.pointers.iter().zip(raw[10..].chunks_mut(4)) {
            slice.copy_from_slice(&pn.to_le_bytes());
        }
        raw
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Whether the reference points at index pages.
    pub fn is_indirect(&self) -> bool {
        self.depth == 1
    }

    pub fn pointers(&self) -> &[BlockId] {
        &self.pointers
    }
}

/// A value as seen through its leaf entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blob {
    /// The value lives in the leaf. Nothing to release.
    Inline { len: usize },
    External(BlobRef),
}

impl Blob {
    /// Interpret a value stored in a leaf.
    ///
    /// Panics if an inline value exceeds `max_inline_len`.
    pub fn from_reference(value: ValueRef, max_inline_len: usize) -> Self {
        match value {
            ValueRef::Inline(raw) => {
                assert!(
                    raw.len() <= max_inline_len,
                    "inline value of {} bytes exceeds the limit of {}",
                    raw.len(),
                    max_inline_len
                );
                Blob::Inline { len: raw.len() }
            }
            ValueRef::Blob(raw) => Blob::External(BlobRef::decode(raw)),
        }
    }

    pub fn value_size(&self) -> usize {
        match self {
            Blob::Inline { len } => *len,
            Blob::External(blob_ref) => blob_ref.value_size,
        }
    }

    /// The encoded reference, if the value lives outside the leaf.
    pub fn reference(&self) -> Option<[u8; BLOB_REF_SIZE]> {
        match self {
            Blob::Inline { .. } => None,
            Blob::External(blob_ref) => Some(blob_ref.encode()),
        }
    }

    /// Release the trailing `len` bytes of the value, retiring every page no longer needed to
    /// hold the remainder. Returns the number of pages retired.
    ///
    /// Releasing the whole value retires all of its pages. This is a no-op for inline values.
    ///
    /// Panics if `len` exceeds the size of the value.
    pub fn release_region(&mut self, txn: &Transaction, len: usize) -> anyhow::Result<usize> {
        let blob_ref = match self {
            Blob::Inline { .. } => return Ok(0),
            Blob::External(blob_ref) => blob_ref,
        };
        assert!(
            len <= blob_ref.value_size,
            "releasing {} bytes of a {} byte blob",
            len,
            blob_ref.value_size
        );

        let new_size = blob_ref.value_size - len;
        let keep = pages_needed(new_size);
        let mut released = 0;

        if !blob_ref.is_indirect() {
            for pn in blob_ref.pointers.drain(keep..) {
                retire(txn, pn)?;
                released += 1;
            }
        } else {
            released += release_indirect(txn, blob_ref, keep)?;
        }

        blob_ref.value_size = new_size;
        if blob_ref.pointers.is_empty() {
            blob_ref.depth = 0;
        }
        txn.cache()
            .metrics()
            .count_n(Metric::BlobPagesReleased, released as u64);
        tracing::trace!(released, remaining = new_size, "released blob region");
        Ok(released)
    }
}

// shrink an indirect blob to `keep` data pages, collapsing it to a direct one if they fit in the
// reference.
fn release_indirect(
    txn: &Transaction,
    blob_ref: &mut BlobRef,
    keep: usize,
) -> anyhow::Result<usize> {
    let mut released = 0;
    let keep_index = keep.div_ceil(INDEX_PAGE_POINTERS);
    let collapse = keep <= MAX_BLOB_REF_POINTERS;
    let mut direct = Vec::new();

    let index_pages = std::mem::take(&mut blob_ref.pointers);
    for (i, index_pn) in index_pages.into_iter().enumerate() {
        let mut index_page = txn.acquire(index_pn, AccessMode::Write)?;
        let data_pages = read_index(index_page.data())?;
        let first = i * INDEX_PAGE_POINTERS;

        // data pages of this index page which are kept.
        let kept = keep.saturating_sub(first).min(data_pages.len());
        for &pn in &data_pages[kept..] {
            retire(txn, pn)?;
            released += 1;
        }

        if collapse {
            direct.extend_from_slice(&data_pages[..kept]);
            index_page.mark_retired();
            released += 1;
        } else if i >= keep_index {
            index_page.mark_retired();
            released += 1;
        } else {
            if kept < data_pages.len() {
                write_index(index_page.data_mut(), &data_pages[..kept]);
            }
            blob_ref.pointers.push(index_pn);
        }
    }

    if collapse {
        blob_ref.depth = 0;
        blob_ref.pointers = direct;
    }
    Ok(released)
}

fn retire(txn: &Transaction, pn: BlockId) -> anyhow::Result<()> {
    let mut page = txn.acquire(pn, AccessMode::Write)?;
    page.mark_retired();
    Ok(())
}

/// Store a value in freshly allocated pages and return its reference.
///
/// Panics if the value is empty or larger than [`MAX_BLOB_VALUE_SIZE`].
pub fn write(txn: &Transaction, value: &[u8]) -> anyhow::Result<BlobRef> {
    assert!(!value.is_empty());
    assert!(
        value.len() <= MAX_BLOB_VALUE_SIZE,
        "value size exceeded MAX_BLOB_VALUE_SIZE"
    );

    let mut data_pages = Vec::with_capacity(pages_needed(value.len()));
    for chunk in value.chunks(PAGE_SIZE) {
        let mut page = txn.allocate()?;
        page.data_mut()[..chunk.len()].copy_from_slice(chunk);
        data_pages.push(page.block_id());
    }

    if data_pages.len() <= MAX_BLOB_REF_POINTERS {
        return Ok(BlobRef {
            value_size: value.len(),
            depth: 0,
            pointers: data_pages,
        });
    }

    let mut index_pages = Vec::new();
    for chunk in data_pages.chunks(INDEX_PAGE_POINTERS) {
        let mut page = txn.allocate()?;
        write_index(page.data_mut(), chunk);
        index_pages.push(page.block_id());
    }
    Ok(BlobRef {
        value_size: value.len(),
        depth: 1,
        pointers: index_pages,
    })
}

/// The data pages of a blob, in value order.
pub fn data_pages(txn: &Transaction, blob_ref: &BlobRef) -> anyhow::Result<Vec<BlockId>> {
    if !blob_ref.is_indirect() {
        return Ok(blob_ref.pointers.clone());
    }
    let mut pages = Vec::new();
    for &index_pn in &blob_ref.pointers {
        let index_page = txn.acquire(index_pn, AccessMode::Read)?;
        pages.extend(read_index(index_page.data())?);
    }
    Ok(pages)
}

/// The total number of pages a blob occupies, index pages included.
pub fn page_count(txn: &Transaction, blob_ref: &BlobRef) -> anyhow::Result<usize> {
    let data = data_pages(txn, blob_ref)?.len();
    let index = if blob_ref.is_indirect() {
        blob_ref.pointers.len()
    } else {
        0
    };
    Ok(data + index)
}

/// Read the whole value of a blob.
pub fn read(txn: &Transaction, blob_ref: &BlobRef) -> anyhow::Result<Vec<u8>> {
    let mut value = Vec::with_capacity(blob_ref.value_size);
    let pages = data_pages(txn, blob_ref)?;
    ensure!(
        pages.len() == pages_needed(blob_ref.value_size),
        "blob of {} bytes has {} data pages",
        blob_ref.value_size,
        pages.len()
    );
    for pn in pages {
        let page = txn.acquire(pn, AccessMode::Read)?;
        let n = std::cmp::min(PAGE_SIZE, blob_ref.value_size - value.len());
        value.extend_from_slice(&page.data()[..n]);
    }
    Ok(value)
}

/// Whether a value of this size is stored as a blob rather than inline.
pub fn is_blob_sized(value_len: usize) -> bool {
    value_len > MAX_INLINE_VALUE_SIZE
}

fn pages_needed(value_size: usize) -> usize {
    value_size.div_ceil(PAGE_SIZE)
}

fn read_index(page: &[u8]) -> anyhow::Result<Vec<BlockId>> {
    ensure!(
        PageKind::of(page) == Some(PageKind::BlobIndex),
        "expected a blob index page"
    );
    let n = u16::from_le_bytes([page[2], page[3]]) as usize;
    ensure!(n <= INDEX_PAGE_POINTERS, "malformed blob index page");
    Ok(page[INDEX_HEADER_SIZE..INDEX_HEADER_SIZE + n * 4]
        .chunks(4)
        .map(BlockId::from_le_slice)
        .collect())
}

fn write_index(page: &mut [u8], pointers: &[BlockId]) {
    assert!(pointers.len() <= INDEX_PAGE_POINTERS);
    page[0] = PageKind::BlobIndex.byte();
    page[1] = 0;
    page[2..4].copy_from_slice(&(pointers.len() as u16).to_le_bytes());
    for (pn, slice) in pointers
        .iter()
        .zip(page[INDEX_HEADER_SIZE..].chunks_mut(4))
    {
        slice.copy_from_slice(&pn.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::{
        data_pages, page_count, read, write, Blob, BlobRef, BLOB_REF_SIZE, INDEX_PAGE_POINTERS,
        MAX_BLOB_REF_POINTERS,
    };
    use crate::{btree::leaf::ValueRef, cache::Cache, Options};
    use sweeptree_core::{page::PAGE_SIZE, AccessMode, OrderToken, ReplicationTimestamp};

    fn cache() -> Cache {
        let mut o = Options::new();
        o.cache_pages(4096);
        Cache::new(&o)
    }

    fn begin(cache: &Cache) -> crate::cache::Transaction {
        cache.begin(
            AccessMode::Write,
            ReplicationTimestamp::INVALID,
            OrderToken::IGNORE,
        )
    }

    fn value(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn reference_encoding() {
        let blob_ref = BlobRef {
            value_size: 12345,
            depth: 0,
            pointers: vec![sweeptree_core::BlockId(3), sweeptree_core::BlockId(4)],
        };
        let raw = blob_ref.encode();
        assert_eq!(raw.len(), BLOB_REF_SIZE);
        assert_eq!(BlobRef::decode(&raw), blob_ref);
    }

    #[test]
    fn inline_values_release_nothing() {
        let cache = cache();
        let txn = begin(&cache);
        let mut blob = Blob::from_reference(ValueRef::Inline(b"small"), 250);
        assert_eq!(blob.value_size(), 5);
        assert_eq!(blob.release_region(&txn, 5).unwrap(), 0);
        assert!(blob.reference().is_none());
    }

    #[test]
    #[should_panic]
    fn oversized_inline_value_panics() {
        Blob::from_reference(ValueRef::Inline(&[0; 10]), 4);
    }

    #[test]
    fn direct_blob_write_read_release() {
        let cache = cache();
        let txn = begin(&cache);
        let v = value(3 * PAGE_SIZE + 10);
        let blob_ref = write(&txn, &v).unwrap();
        assert!(!blob_ref.is_indirect());
        assert_eq!(blob_ref.pointers().len(), 4);
        assert_eq!(read(&txn, &blob_ref).unwrap(), v);

        let mut blob = Blob::External(blob_ref);
        // dropping the 10 trailing bytes frees the last page.
        assert_eq!(blob.release_region(&txn, 10).unwrap(), 1);
        let Blob::External(ref shrunk) = blob else { unreachable!() };
        assert_eq!(shrunk.value_size(), 3 * PAGE_SIZE);
        assert_eq!(read(&txn, shrunk).unwrap(), &v[..3 * PAGE_SIZE]);

        let size = blob.value_size();
        assert_eq!(blob.release_region(&txn, size).unwrap(), 3);
        assert_eq!(blob.value_size(), 0);
    }

    #[test]
    fn indirect_blob_collapses_when_small_enough() {
        let cache = cache();
        let txn = begin(&cache);
        let n_data = INDEX_PAGE_POINTERS + 5;
        let v = value(n_data * PAGE_SIZE);
        let blob_ref = write(&txn, &v).unwrap();
        assert!(blob_ref.is_indirect());
        assert_eq!(blob_ref.pointers().len(), 2);
        assert_eq!(page_count(&txn, &blob_ref).unwrap(), n_data + 2);
        assert_eq!(read(&txn, &blob_ref).unwrap(), v);

        // shrink to one full index page, dropping the second.
        let mut blob = Blob::External(blob_ref);
        let released = blob.release_region(&txn, 5 * PAGE_SIZE).unwrap();
        assert_eq!(released, 5 + 1);
        let Blob::External(ref shrunk) = blob else { unreachable!() };
        assert!(shrunk.is_indirect());
        assert_eq!(shrunk.pointers().len(), 1);
        assert_eq!(
            data_pages(&txn, shrunk).unwrap().len(),
            INDEX_PAGE_POINTERS
        );

        // shrink to fewer pages than fit in the reference.
        let remove = (INDEX_PAGE_POINTERS - MAX_BLOB_REF_POINTERS) * PAGE_SIZE;
        let released = blob.release_region(&txn, remove).unwrap();
        assert_eq!(released, INDEX_PAGE_POINTERS - MAX_BLOB_REF_POINTERS + 1);
        let Blob::External(ref collapsed) = blob else { unreachable!() };
        assert!(!collapsed.is_indirect());
        assert_eq!(collapsed.pointers().len(), MAX_BLOB_REF_POINTERS);
        assert_eq!(
            read(&txn, collapsed).unwrap(),
            &v[..MAX_BLOB_REF_POINTERS * PAGE_SIZE]
        );
    }

    #[test]
    fn full_release_retires_every_page() {
        let cache = cache();
        let txn = begin(&cache);
        let v = value(2 * INDEX_PAGE_POINTERS * PAGE_SIZE + 1);
        let blob_ref = write(&txn, &v).unwrap();
        let total = page_count(&txn, &blob_ref).unwrap();
        let mut blob = Blob::External(blob_ref);
        assert_eq!(blob.release_region(&txn, v.len()).unwrap(), total);
        drop(blob);

        let output = txn.commit().unwrap();
        assert_eq!(output.retired.len(), total);
        assert_eq!(cache.live_blocks(), 0);
    }
}
