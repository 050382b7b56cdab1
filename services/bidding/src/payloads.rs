//! Job payloads produced by admission
//!
//! Payloads carry everything the write-down handler needs, so the job
//! runner can redeliver them without consulting live state. Keys are
//! natural identifiers: redelivery of the same bid coalesces, and the
//! mirror queue keeps a single writer per auction.

use chrono::{DateTime, Utc};
use cold_store::NewBid;
use serde::{Deserialize, Serialize};
use types::prelude::*;

/// `persist-bid` payload: one accepted bid, ready for the append-only log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistBidPayload {
    pub bid_id: BidId,
    pub auction_id: AuctionId,
    pub bidder_id: UserId,
    pub amount: Money,
    pub bid_time: DateTime<Utc>,
    pub previous_bid: Money,
    pub total_bids: u64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl PersistBidPayload {
    /// Natural key: `bid-{auction}-{bidder}-{acceptance micros}`
    pub fn job_key(&self) -> String {
        format!(
            "bid-{}-{}-{}",
            self.auction_id,
            self.bidder_id,
            self.bid_time.timestamp_micros()
        )
    }

    pub fn into_new_bid(self) -> NewBid {
        NewBid {
            bid_id: self.bid_id,
            auction_id: self.auction_id,
            bidder_id: self.bidder_id,
            amount: self.amount,
            bid_time: self.bid_time,
            previous_bid: self.previous_bid,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
        }
    }
}

/// `update-auction-mirror` payload: full mutable state of the cold row
///
/// Full-state payloads make last-writer-wins safe: a superseded update
/// never has to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorPayload {
    pub auction_id: AuctionId,
    pub current_bid: Money,
    pub highest_bidder_id: Option<UserId>,
    pub total_bids: u64,
    /// Set when an extension moved the end time
    pub end_time: Option<DateTime<Utc>>,
}

impl MirrorPayload {
    /// Natural key: one writer per auction
    pub fn job_key(&self) -> String {
        format!("mirror-{}", self.auction_id)
    }
}
