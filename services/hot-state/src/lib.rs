//! Hot-State Store
//!
//! Authoritative in-memory state for live auctions. All writes go through
//! the three atomic primitives on [`store::HotStore`]; no component may
//! read-modify-write an auction record outside them. Operations targeting
//! the same auction are serialized by the keyed record guard, which is the
//! correctness foundation for bid admission.

pub mod index;
pub mod store;
pub mod sweeper;

pub use index::ActiveIndex;
pub use store::{BidAccepted, ExpiryEvent, ExtendOutcome, FinalOutcome, HotStore, HotStoreConfig};
