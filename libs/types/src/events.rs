//! Fan-out bus event types
//!
//! One event is published per committed hot-store mutation. Events are an
//! optimisation for latency, never a source of truth: a subscriber that
//! misses one converges by re-reading the auction.

use crate::ids::{AuctionId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bid summary carried on `bid-placed` events and room broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidBroadcast {
    pub amount: Money,
    pub bidder_id: UserId,
    pub bidder_username: String,
    pub timestamp: DateTime<Utc>,
    pub total_bids: u64,
}

/// End-time extension data piggybacked on a `bid-placed` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub old_end_time: DateTime<Utc>,
    pub new_end_time: DateTime<Utc>,
    pub extended_by_secs: i64,
}

/// Events carried by the fan-out bus
///
/// Per-auction publish order matches commit order in the hot store; the
/// bus only adds per-subscriber FIFO delivery on top. Duplicate delivery
/// is allowed, so consumers treat a repeated (`total_bids`, `amount`)
/// pair as a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuctionEvent {
    /// A bid was admitted by the hot store
    BidPlaced {
        auction_id: AuctionId,
        bid: BidBroadcast,
        /// Present when the bid triggered an anti-snipe extension
        extension: Option<ExtensionInfo>,
    },

    /// An auction was finalized exactly once
    AuctionEnded {
        auction_id: AuctionId,
        winner_id: Option<UserId>,
        winning_bid: Option<Money>,
        total_bids: u64,
        end_time: DateTime<Utc>,
    },
}

impl AuctionEvent {
    /// The auction this event belongs to
    pub fn auction_id(&self) -> AuctionId {
        match self {
            AuctionEvent::BidPlaced { auction_id, .. } => *auction_id,
            AuctionEvent::AuctionEnded { auction_id, .. } => *auction_id,
        }
    }

    /// Topic name for the event, used for logging and routing
    pub fn topic(&self) -> &'static str {
        match self {
            AuctionEvent::BidPlaced { extension: None, .. } => "bid-placed",
            AuctionEvent::BidPlaced { extension: Some(_), .. } => "auction-extended",
            AuctionEvent::AuctionEnded { .. } => "auction-ended",
        }
    }
}
