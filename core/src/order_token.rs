//! Order tokens.
//!
//! An order token is a causal sequence marker: the bucket identifies the source which issued it,
//! the value is that source's counter at issue time and the tag is a human-readable origin label
//! used in diagnostics. Tokens say nothing about tree structure; they are only used to admit
//! operations into the transaction substrate in a deterministic order.

use alloc::string::String;
use core::fmt;

/// The bucket of tokens which bypass ordering checks.
pub const IGNORE_BUCKET: u32 = u32::MAX;

#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshSerialize, borsh::BorshDeserialize)
)]
pub struct OrderToken {
    bucket: u32,
    value: u64,
    tag: String,
}

impl OrderToken {
    /// A token that is accepted anywhere without being checked.
    pub const IGNORE: OrderToken = OrderToken {
        bucket: IGNORE_BUCKET,
        value: 0,
        tag: String::new(),
    };

    pub fn new(bucket: u32, value: u64, tag: impl Into<String>) -> Self {
        OrderToken {
            bucket,
            value,
            tag: tag.into(),
        }
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_ignore(&self) -> bool {
        self.bucket == IGNORE_BUCKET
    }

    /// The same position in the same bucket, under a different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        OrderToken {
            bucket: self.bucket,
            value: self.value,
            tag: tag.into(),
        }
    }
}

impl fmt::Debug for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ignore() {
            write!(f, "OrderToken(ignore)")
        } else {
            write!(f, "OrderToken({}:{} {:?})", self.bucket, self.value, self.tag)
        }
    }
}
