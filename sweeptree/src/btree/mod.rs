//! B-tree page formats and operations.
//!
//! Every page reachable from a superblock starts with a kind byte which tells the traversal how
//! to interpret it. Leaf and internal nodes are described in [`leaf`] and [`internal`]; values
//! too large to live in a leaf are stored as blobs, see [`blob`].

pub mod blob;
pub mod internal;
pub mod leaf;
pub mod ops;
pub mod superblock;

pub use internal::InternalNode;
pub use leaf::LeafNode;
pub use superblock::Superblock;

/// Keys are fixed-width.
pub type Key = [u8; 32];

/// The kind byte stored at offset 0 of every tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Leaf,
    Internal,
    Superblock,
    BlobIndex,
}

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;
const KIND_SUPERBLOCK: u8 = 3;
const KIND_BLOB_INDEX: u8 = 4;

impl PageKind {
    /// Read the kind of a page. Returns `None` for an unknown kind byte.
    pub fn of(page: &[u8]) -> Option<PageKind> {
        match page[0] {
            KIND_LEAF => Some(PageKind::Leaf),
            KIND_INTERNAL => Some(PageKind::Internal),
            KIND_SUPERBLOCK => Some(PageKind::Superblock),
            KIND_BLOB_INDEX => Some(PageKind::BlobIndex),
            _ => None,
        }
    }

    pub(crate) fn byte(self) -> u8 {
        match self {
            PageKind::Leaf => KIND_LEAF,
            PageKind::Internal => KIND_INTERNAL,
            PageKind::Superblock => KIND_SUPERBLOCK,
            PageKind::BlobIndex => KIND_BLOB_INDEX,
        }
    }
}
