//! Bid Admission Service
//!
//! Orchestrates the life of a bid request: rate gate, the atomic hot-store
//! admission, lazy hydration on a cold-cache miss, the anti-snipe
//! extension policy, and the post-commit fan-out (persistence jobs + bus
//! publish). Two rules are absolute: nothing is published before the hot
//! store returns OK, and nothing is persisted before the hot store
//! returns OK.

pub mod admission;
pub mod extension;
pub mod payloads;
pub mod rate_limit;

pub use admission::{
    AcceptedBid, AdmissionError, AdmissionService, AuctionSource, BidRequest, FinalizationHook,
};
pub use extension::ExtensionPolicy;
pub use rate_limit::RateGate;
