//! Error taxonomy for the store primitives
//!
//! These are business outcomes, not infrastructure failures: every variant
//! maps to a wire code surfaced to the bidding client. Transient
//! infrastructure errors live with the component that hits them.

use crate::auction::AuctionStatus;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Why a bid was not admitted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BidRejection {
    #[error("Auction not found")]
    NotFound,

    #[error("Bid amount must be a positive decimal")]
    InvalidAmount,

    #[error("Auction is not active (status: {status:?})")]
    NotActive { status: AuctionStatus },

    #[error("Auction has already ended")]
    Ended { end_time: DateTime<Utc> },

    #[error("Sellers cannot bid on their own auction")]
    SellerCannotBid,

    #[error("Bid of {your_bid} is below the minimum of {minimum_bid}")]
    TooLow {
        current_bid: Money,
        minimum_bid: Money,
        your_bid: Money,
        is_first_bid: bool,
    },

    #[error("Too many bids, try again in a moment")]
    RateLimited,
}

impl BidRejection {
    /// Wire code for the client-facing rejection
    pub fn code(&self) -> &'static str {
        match self {
            BidRejection::NotFound => "AUCTION_NOT_FOUND",
            BidRejection::InvalidAmount => "INVALID_BID_AMOUNT",
            BidRejection::NotActive { .. } => "AUCTION_NOT_ACTIVE",
            BidRejection::Ended { .. } => "AUCTION_ENDED",
            BidRejection::SellerCannotBid => "SELLER_CANNOT_BID",
            BidRejection::TooLow { .. } => "BID_TOO_LOW",
            BidRejection::RateLimited => "RATE_LIMIT_EXCEEDED",
        }
    }

    /// Structured details for UI presentation (business-rule errors only)
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            BidRejection::TooLow {
                current_bid,
                minimum_bid,
                your_bid,
                is_first_bid,
            } => Some(json!({
                "current_bid": current_bid.to_string(),
                "minimum_bid": minimum_bid.to_string(),
                "your_bid": your_bid.to_string(),
                "is_first_bid": is_first_bid,
            })),
            _ => None,
        }
    }
}

/// Why an end-time extension did not apply
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtendError {
    #[error("Auction not found")]
    NotFound,

    #[error("Auction is not active (status: {status:?})")]
    NotActive { status: AuctionStatus },
}

/// Why finalization did not commit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinalizeError {
    #[error("Auction not found")]
    NotFound,

    #[error("Auction has not ended yet (ends at {end_time})")]
    NotEnded { end_time: DateTime<Utc> },

    #[error("Auction is already finalized")]
    AlreadyFinal,
}
