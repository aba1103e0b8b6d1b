use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Metrics collector, if active, it provides Counters and Timers
#[derive(Clone)]
pub struct Metrics {
    metrics: Option<Arc<ActiveMetrics>>,
}

/// Metrics that can be collected during execution
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Metric {
    /// Counter of page acquisitions over all transactions
    PageAcquisitions,
    /// Counter of pages retired over all committed transactions
    PagesRetired,
    /// Counter of leaves handed to a traversal policy
    LeavesProcessed,
    /// Counter of internal nodes post-processed by a traversal policy
    InternalNodesProcessed,
    /// Counter of blob pages released
    BlobPagesReleased,
    /// Timer used to record average traversal time
    TraversalTime,
    /// Timer used to record average commit time
    CommitTime,
}

struct ActiveMetrics {
    page_acquisitions: AtomicU64,
    pages_retired: AtomicU64,
    leaves_processed: AtomicU64,
    internal_nodes_processed: AtomicU64,
    blob_pages_released: AtomicU64,
    traversal_time: Timer,
    commit_time: Timer,
}

impl Metrics {
    /// Returns the Metrics object, active or not based on the specified input
    pub fn new(active: bool) -> Self {
        Self {
            metrics: if active {
                Some(Arc::new(ActiveMetrics {
                    page_acquisitions: AtomicU64::new(0),
                    pages_retired: AtomicU64::new(0),
                    leaves_processed: AtomicU64::new(0),
                    internal_nodes_processed: AtomicU64::new(0),
                    blob_pages_released: AtomicU64::new(0),
                    traversal_time: Timer::new(),
                    commit_time: Timer::new(),
                }))
            } else {
                None
            },
        }
    }

    /// Increase the Counter specified by the input
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn count(&self, metric: Metric) {
        self.count_n(metric, 1)
    }

    /// Increase the Counter specified by the input by `n`
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn count_n(&self, metric: Metric, n: u64) {
        if let Some(ref metrics) = self.metrics {
            metrics.counter(metric).fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Read back a Counter. Returns `None` if collection is off.
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn get(&self, metric: Metric) -> Option<u64> {
        self.metrics
            .as_ref()
            .map(|metrics| metrics.counter(metric).load(Ordering::Relaxed))
    }

    /// Returns a guard that, when dropped, will record the time passed since creation
    ///
    /// panics if the specified [`Metric`] is not a Timer
    pub fn record<'a>(&'a self, metric: Metric) -> Option<impl Drop + 'a> {
        self.metrics.as_ref().map(|metrics| {
            let timer = match metric {
                Metric::TraversalTime => &metrics.traversal_time,
                Metric::CommitTime => &metrics.commit_time,
                _ => panic!("Specified metric is not a Timer"),
            };

            timer.record()
        })
    }

    /// Print collected metrics to stdout
    pub fn print(&self) {
        if let Some(ref metrics) = self.metrics {
            println!("metrics");

            let page_acquisitions = metrics.page_acquisitions.load(Ordering::Relaxed);
            println!("  page acquisitions     {}", page_acquisitions);

            let pages_retired = metrics.pages_retired.load(Ordering::Relaxed);
            println!("  pages retired         {}", pages_retired);

            let leaves = metrics.leaves_processed.load(Ordering::Relaxed);
            println!("  leaves processed      {}", leaves);

            let internal = metrics.internal_nodes_processed.load(Ordering::Relaxed);
            println!("  internal nodes        {}", internal);

            let blob_pages = metrics.blob_pages_released.load(Ordering::Relaxed);
            println!("  blob pages released   {}", blob_pages);

            if let Some(mean) = metrics.traversal_time.mean() {
                println!("  traversal mean        {}", pretty_display_ns(mean));
            }

            if let Some(mean) = metrics.commit_time.mean() {
                println!("  commit mean           {}", pretty_display_ns(mean));
            }
        } else {
            println!("Metrics collection was not activated")
        }
    }
}

impl ActiveMetrics {
    fn counter(&self, metric: Metric) -> &AtomicU64 {
        match metric {
            Metric::PageAcquisitions => &self.page_acquisitions,
            Metric::PagesRetired => &self.pages_retired,
            Metric::LeavesProcessed => &self.leaves_processed,
            Metric::InternalNodesProcessed => &self.internal_nodes_processed,
            Metric::BlobPagesReleased => &self.blob_pages_released,
            _ => panic!("Specified metric is not a Counter"),
        }
    }
}

fn pretty_display_ns(ns: u64) -> String {
    // preserve 3 sig figs at minimum.
    let (val, unit) = if ns > 100 * 1_000_000_000 {
        (ns / 1_000_000_000, "s")
    } else if ns > 100 * 1_000_000 {
        (ns / 1_000_000, "ms")
    } else if ns > 100 * 1_000 {
        (ns / 1_000, "us")
    } else {
        (ns, "ns")
    };

    format!("{val} {unit}")
}

struct Timer {
    number_of_records: AtomicU64,
    sum: AtomicU64,
}

impl Timer {
    fn new() -> Self {
        Timer {
            number_of_records: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    fn mean(&self) -> Option<u64> {
        let n = self.number_of_records.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        sum.checked_div(n)
    }

    fn record<'a>(&'a self) -> impl Drop + 'a {
        struct TimerGuard<'a> {
            start: std::time::Instant,
            n: &'a AtomicU64,
            sum: &'a AtomicU64,
        }

        impl Drop for TimerGuard<'_> {
            fn drop(&mut self) {
                let elapsed = self.start.elapsed().as_nanos() as u64;
                self.n.fetch_add(1, Ordering::Relaxed);
                self.sum.fetch_add(elapsed, Ordering::Relaxed);
            }
        }

        TimerGuard {
            start: std::time::Instant::now(),
            n: &self.number_of_records,
            sum: &self.sum,
        }
    }
}
