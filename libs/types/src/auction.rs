//! Auction lifecycle types
//!
//! The live auction record is the unit of state held by the hot store;
//! every mutation goes through the store primitives, which call the
//! methods here only after the precondition ladder has passed.

use crate::ids::{AuctionId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Auction status enum
///
/// `ended` and `cancelled` are terminal; no state mutation is permitted
/// once either is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Draft,
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

impl AuctionStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuctionStatus::Ended | AuctionStatus::Cancelled)
    }

    /// Lowercase wire/database label
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Draft => "draft",
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Ended => "ended",
            AuctionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for AuctionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AuctionStatus::Draft),
            "scheduled" => Ok(AuctionStatus::Scheduled),
            "active" => Ok(AuctionStatus::Active),
            "ended" => Ok(AuctionStatus::Ended),
            "cancelled" => Ok(AuctionStatus::Cancelled),
            other => Err(format!("unknown auction status: {}", other)),
        }
    }
}

/// One accepted bid in an auction's in-memory history
///
/// The sequence is ordered by amount, which coincides with commit order
/// because accepted amounts are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidEntry {
    pub bidder_id: UserId,
    pub amount: Money,
    pub placed_at: DateTime<Utc>,
    /// Amount displaced by this bid (starting price for the first bid)
    pub previous_bid: Money,
}

/// Result of applying an accepted bid to the live record
#[derive(Debug, Clone, PartialEq)]
pub struct BidApplied {
    pub previous_bid: Money,
    pub previous_bidder_id: Option<UserId>,
    pub total_bids: u64,
}

/// Complete live auction record
///
/// Immutable fields are set at creation; mutable fields only move through
/// the hot store primitives. `current_bid`, `total_bids`, and `end_time`
/// are monotone non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveAuction {
    pub id: AuctionId,
    pub seller_id: UserId,
    pub starting_price: Money,
    pub bid_increment: Money,
    pub reserve_price: Option<Money>,
    pub start_time: DateTime<Utc>,
    pub original_end_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub current_bid: Money,
    pub highest_bidder_id: Option<UserId>,
    pub total_bids: u64,
    pub status: AuctionStatus,
    /// Accepted bids in commit order
    pub bid_history: Vec<BidEntry>,
}

impl LiveAuction {
    /// Create a new auction record with no bids
    ///
    /// # Panics
    /// Panics if the increment is not positive or the reserve is below
    /// the starting price
    pub fn new(
        id: AuctionId,
        seller_id: UserId,
        starting_price: Money,
        bid_increment: Money,
        reserve_price: Option<Money>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: AuctionStatus,
    ) -> Self {
        assert!(bid_increment.is_positive(), "bid increment must be positive");
        if let Some(reserve) = reserve_price {
            assert!(reserve >= starting_price, "reserve below starting price");
        }
        Self {
            id,
            seller_id,
            starting_price,
            bid_increment,
            reserve_price,
            start_time,
            original_end_time: end_time,
            end_time,
            current_bid: starting_price,
            highest_bidder_id: None,
            total_bids: 0,
            status,
            bid_history: Vec::new(),
        }
    }

    /// Whether any bid has been accepted yet
    pub fn is_first_bid(&self) -> bool {
        self.highest_bidder_id.is_none()
    }

    /// Minimum acceptable next bid and whether it is the first bid
    ///
    /// The first bid only has to meet the starting price. Afterwards each
    /// bid must clear `current_bid + effective_increment`, where a positive
    /// hint overrides the stored increment.
    pub fn minimum_bid(&self, increment_hint: Option<Money>) -> (Money, bool) {
        if self.is_first_bid() {
            (self.starting_price, true)
        } else {
            let increment = match increment_hint {
                Some(hint) if hint.is_positive() => hint,
                _ => self.bid_increment,
            };
            (self.current_bid + increment, false)
        }
    }

    /// Apply an accepted bid to the record
    ///
    /// Callers must have validated the amount against [`minimum_bid`]
    /// first; this method only performs the mutation.
    ///
    /// # Panics
    /// Panics if the amount would break price monotonicity
    pub fn apply_bid(&mut self, bidder_id: UserId, amount: Money, at: DateTime<Utc>) -> BidApplied {
        assert!(
            self.is_first_bid() || amount > self.current_bid,
            "bid must raise the current price"
        );

        let previous_bid = self.current_bid;
        let previous_bidder_id = self.highest_bidder_id;

        self.current_bid = amount;
        self.highest_bidder_id = Some(bidder_id);
        self.total_bids += 1;
        self.bid_history.push(BidEntry {
            bidder_id,
            amount,
            placed_at: at,
            previous_bid,
        });

        BidApplied {
            previous_bid,
            previous_bidder_id,
            total_bids: self.total_bids,
        }
    }

    /// Seconds remaining until close (zero once past the end)
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }

    /// Check the record's internal invariants
    pub fn check_invariants(&self) -> bool {
        let price_ok = if self.is_first_bid() {
            self.current_bid == self.starting_price && self.total_bids == 0
        } else {
            self.current_bid >= self.starting_price && self.total_bids > 0
        };
        let seller_ok = self.highest_bidder_id != Some(self.seller_id);
        let end_ok = self.end_time >= self.original_end_time;
        let history_ok = self.bid_history.len() as u64 == self.total_bids;
        price_ok && seller_ok && end_ok && history_ok
    }
}
