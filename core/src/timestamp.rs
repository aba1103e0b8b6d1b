/// The causal stamp recorded with a write transaction.
///
/// Operations which have no meaningful stamp, such as resetting a tree during backfill, use
/// [`ReplicationTimestamp::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshSerialize, borsh::BorshDeserialize)
)]
pub struct ReplicationTimestamp(pub u64);

impl ReplicationTimestamp {
    pub const INVALID: ReplicationTimestamp = ReplicationTimestamp(u64::MAX);
    pub const DISTANT_PAST: ReplicationTimestamp = ReplicationTimestamp(0);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// The next timestamp. Panics on the invalid timestamp.
    pub fn next(&self) -> ReplicationTimestamp {
        assert!(self.is_valid());
        ReplicationTimestamp(self.0 + 1)
    }
}
