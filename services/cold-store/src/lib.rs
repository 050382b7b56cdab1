//! Cold Store Adapter
//!
//! Durable side of the hot/cold split: an append-only `bids` log plus a
//! mirrored `auctions` table in Postgres. The adapter is a write-down
//! target only: admission decisions are made in the hot store, and
//! nothing here mutates or deletes a bid row once written.

pub mod rows;
pub mod store;

pub use rows::{AuctionRow, BidRow, NewBid};
pub use store::{ColdStore, ColdStoreError};
