//! Admission ordering.
//!
//! Operations on a tree carry [`OrderToken`]s issued by an [`OrderSource`]. Sinks and checkpoints
//! sit at the points where operations are admitted and assert that tokens from each source arrive
//! in the order they were issued. Tokens from the ignore bucket pass unchecked.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use sweeptree_core::{order_token::IGNORE_BUCKET, OrderToken};

static NEXT_BUCKET: AtomicU32 = AtomicU32::new(0);

/// Issues tokens in increasing order within a bucket of its own.
pub struct OrderSource {
    bucket: u32,
    counter: AtomicU64,
}

impl OrderSource {
    pub fn new() -> Self {
        let bucket = NEXT_BUCKET.fetch_add(1, Ordering::Relaxed);
        assert!(bucket != IGNORE_BUCKET, "order token buckets exhausted");
        OrderSource {
            bucket,
            counter: AtomicU64::new(0),
        }
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    /// Issue the next token.
    pub fn check_in(&self, tag: impl Into<String>) -> OrderToken {
        let value = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        OrderToken::new(self.bucket, value, tag)
    }
}

impl Default for OrderSource {
    fn default() -> Self {
        Self::new()
    }
}

// the last token seen from each bucket.
#[derive(Default)]
struct LastSeen {
    buckets: Mutex<FxHashMap<u32, (u64, String)>>,
}

impl LastSeen {
    fn check(&self, token: &OrderToken, strict: bool, what: &str) {
        if token.is_ignore() {
            return;
        }
        let mut buckets = self.buckets.lock();
        if let Some((last, last_tag)) = buckets.get(&token.bucket()) {
            let in_order = if strict {
                token.value() > *last
            } else {
                token.value() >= *last
            };
            assert!(
                in_order,
                "{}: {:?} arrived after {}:{} {:?}",
                what,
                token,
                token.bucket(),
                last,
                last_tag
            );
        }
        buckets.insert(token.bucket(), (token.value(), token.tag().to_owned()));
    }
}

/// Consumes tokens. Each token of a source must be checked out at most once and in issue order.
#[derive(Default)]
pub struct OrderSink {
    last_seen: LastSeen,
}

impl OrderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics if a later token of the same source was already checked out.
    pub fn check_out(&self, token: OrderToken) {
        tracing::trace!(?token, "check out");
        self.last_seen.check(&token, true, "order sink");
    }
}

/// Passes tokens through a point of the admission path, asserting they never regress.
pub struct OrderCheckpoint {
    tag: String,
    last_seen: LastSeen,
}

impl OrderCheckpoint {
    pub fn new(tag: impl Into<String>) -> Self {
        OrderCheckpoint {
            tag: tag.into(),
            last_seen: LastSeen::default(),
        }
    }

    /// Check the token and return it tagged with this checkpoint.
    ///
    /// The same token may pass more than once. Panics if an earlier token of the same source
    /// arrives after a later one.
    pub fn check_through(&self, token: OrderToken) -> OrderToken {
        self.last_seen.check(&token, false, &self.tag);
        if token.is_ignore() {
            return token;
        }
        token.with_tag(format!("{}+{}", token.tag(), self.tag))
    }
}
