//! Core types of the sweeptree traversal engine.
//!
//! This crate defines the data model shared by the buffer substrate, the node formats and the
//! traversal engine: block identifiers, access modes, order tokens and replication timestamps.
//!
//! None of the types here perform I/O. They do not require the standard library, but do require
//! Rust's alloc crate.

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

pub mod access;
pub mod block_id;
pub mod order_token;
pub mod page;
pub mod timestamp;

pub use access::AccessMode;
pub use block_id::{BlockId, BlockIdSet, NULL_BLOCK_ID};
pub use order_token::OrderToken;
pub use timestamp::ReplicationTimestamp;
