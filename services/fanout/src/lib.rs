//! Fan-out Bus
//!
//! Topic pub/sub used to push committed auction events to every gateway
//! instance in the process group. Delivery is at-least-once within the
//! group: per-auction publish order follows commit order (the hot store
//! has a single commit point per auction), and each subscriber sees its
//! own FIFO stream. A lost event never makes the truth wrong; late
//! subscribers converge by re-reading the auction.

pub mod bus;

pub use bus::{BusSubscriber, FanoutBus};
