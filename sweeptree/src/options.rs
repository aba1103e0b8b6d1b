/// Options when creating a [`crate::Cache`] and opening a [`crate::BtreeSlice`].
#[derive(Clone)]
pub struct Options {
    /// The number of workers used to traverse sibling subtrees concurrently.
    pub(crate) traversal_concurrency: usize,
    /// The maximum number of pages the cache may hold, including the superblock.
    pub(crate) cache_pages: u32,
    /// Enable or disable metrics collection.
    pub(crate) metrics: bool,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    pub fn new() -> Self {
        Self {
            traversal_concurrency: 4,
            cache_pages: 1 << 20,
            metrics: false,
        }
    }

    /// Set the number of traversal workers.
    ///
    /// A value of 1 traverses every tree sequentially on the calling thread.
    ///
    /// May not be zero.
    pub fn traversal_concurrency(&mut self, traversal_concurrency: usize) {
        assert!(traversal_concurrency > 0);
        self.traversal_concurrency = traversal_concurrency;
    }

    /// Set the maximum number of pages held by the cache.
    ///
    /// Allocations beyond this bound fail and abort the enclosing transaction.
    ///
    /// Default: 1048576 pages, i.e. 4GiB.
    pub fn cache_pages(&mut self, cache_pages: u32) {
        assert!(cache_pages > 0);
        self.cache_pages = cache_pages;
    }

    /// Set metrics collection on or off.
    ///
    /// Default: off.
    pub fn metrics(&mut self, metrics: bool) {
        self.metrics = metrics;
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn page_size_is_4096() {
    // Update the docs above if this fails.
    assert_eq!(crate::PAGE_SIZE, 4096);
}
