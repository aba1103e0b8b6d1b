//! The fixed-size page.

use core::ops::{Deref, DerefMut};

/// The size of every page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The raw contents of one page.
#[derive(Clone)]
#[repr(align(4096))]
pub struct Page(pub [u8; PAGE_SIZE]);

impl Deref for Page {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Page {
    pub fn zeroed() -> Self {
        Self([0; PAGE_SIZE])
    }
}
