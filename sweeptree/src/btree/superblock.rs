/// Here is the layout of the superblock:
///
/// ```rust,ignore
/// kind: u8 // PageKind::Superblock
/// reserved: [u8; 3]
/// root_block: u32
/// metadata: [u8] // opaque to the traversal
/// ```
use sweeptree_core::{BlockId, NULL_BLOCK_ID};

use super::PageKind;

const ROOT_BLOCK_OFFSET: usize = 4;

/// The start of the opaque metadata region.
pub const SUPERBLOCK_METADATA_OFFSET: usize = 8;

/// A view over a superblock page.
pub struct Superblock<'a> {
    inner: &'a [u8],
}

impl<'a> Superblock<'a> {
    /// Panics if the page is not a superblock.
    pub fn new(page: &'a [u8]) -> Self {
        assert_eq!(
            PageKind::of(page),
            Some(PageKind::Superblock),
            "page is not a superblock"
        );
        Superblock { inner: page }
    }

    /// The root of the tree, or [`NULL_BLOCK_ID`] if the tree is empty.
    pub fn root_block(&self) -> BlockId {
        BlockId::from_le_slice(&self.inner[ROOT_BLOCK_OFFSET..])
    }

    pub fn is_empty(&self) -> bool {
        self.root_block().is_null()
    }

    pub fn metadata(&self) -> &'a [u8] {
        &self.inner[SUPERBLOCK_METADATA_OFFSET..]
    }
}

/// Format a zeroed page as the superblock of an empty tree.
pub fn init(page: &mut [u8]) {
    page[0] = PageKind::Superblock.byte();
    set_root_block(page, NULL_BLOCK_ID);
}

/// Rewrite the root pointer of a superblock page.
pub fn set_root_block(page: &mut [u8], root: BlockId) {
    assert_eq!(PageKind::of(page), Some(PageKind::Superblock));
    page[ROOT_BLOCK_OFFSET..ROOT_BLOCK_OFFSET + 4].copy_from_slice(&root.to_le_bytes());
}
