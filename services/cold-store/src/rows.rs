//! Row types for the durable tables
//!
//! Rows carry raw database shapes; conversion into the live domain type
//! validates status strings and money signs so a corrupted row surfaces
//! as an error instead of a panic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use types::prelude::*;
use uuid::Uuid;

use crate::store::ColdStoreError;

/// One row of the `auctions` mirror
#[derive(Debug, Clone, FromRow)]
pub struct AuctionRow {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub starting_price: Decimal,
    pub reserve_price: Option<Decimal>,
    pub current_bid: Decimal,
    pub bid_increment: Decimal,
    pub highest_bidder_id: Option<Uuid>,
    pub total_bids: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub original_end_time: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuctionRow {
    /// Convert into the live record used by the hot store
    ///
    /// The in-memory bid history restarts empty at hydration; the
    /// complete log stays in the `bids` table.
    pub fn into_live(self) -> Result<LiveAuction, ColdStoreError> {
        let corrupt = |reason: &str| ColdStoreError::Corrupt {
            auction_id: self.id,
            reason: reason.to_string(),
        };

        let status: AuctionStatus = self
            .status
            .parse()
            .map_err(|_| corrupt("unknown status"))?;
        let starting_price =
            Money::try_new(self.starting_price).ok_or_else(|| corrupt("negative starting price"))?;
        let bid_increment =
            Money::try_new(self.bid_increment).ok_or_else(|| corrupt("negative increment"))?;
        let current_bid =
            Money::try_new(self.current_bid).ok_or_else(|| corrupt("negative current bid"))?;
        let reserve_price = match self.reserve_price {
            Some(value) => {
                Some(Money::try_new(value).ok_or_else(|| corrupt("negative reserve price"))?)
            }
            None => None,
        };
        if self.total_bids < 0 {
            return Err(corrupt("negative bid count"));
        }

        Ok(LiveAuction {
            id: AuctionId::from_uuid(self.id),
            seller_id: UserId::from_uuid(self.seller_id),
            starting_price,
            bid_increment,
            reserve_price,
            start_time: self.start_time,
            original_end_time: self.original_end_time,
            end_time: self.end_time,
            current_bid,
            highest_bidder_id: self.highest_bidder_id.map(UserId::from_uuid),
            total_bids: self.total_bids as u64,
            status,
            bid_history: Vec::new(),
        })
    }
}

/// One row of the append-only `bids` log
#[derive(Debug, Clone, FromRow)]
pub struct BidRow {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Decimal,
    pub bid_time: DateTime<Utc>,
    pub previous_bid: Option<Decimal>,
    pub is_winning: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A bid accepted by the hot store, ready to be written down
///
/// `is_winning` reflects the snapshot at admission; the current winner is
/// always recomputed from the auction row.
#[derive(Debug, Clone)]
pub struct NewBid {
    pub bid_id: BidId,
    pub auction_id: AuctionId,
    pub bidder_id: UserId,
    pub amount: Money,
    pub bid_time: DateTime<Utc>,
    pub previous_bid: Money,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> AuctionRow {
        let now = Utc.timestamp_opt(900, 0).unwrap();
        AuctionRow {
            id: Uuid::now_v7(),
            seller_id: Uuid::now_v7(),
            title: "Walnut desk".to_string(),
            description: String::new(),
            category: Some("furniture".to_string()),
            starting_price: Decimal::new(10000, 2),
            reserve_price: None,
            current_bid: Decimal::new(10500, 2),
            bid_increment: Decimal::new(500, 2),
            highest_bidder_id: Some(Uuid::now_v7()),
            total_bids: 2,
            start_time: now,
            end_time: Utc.timestamp_opt(1000, 0).unwrap(),
            original_end_time: Utc.timestamp_opt(1000, 0).unwrap(),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_into_live() {
        let row = sample_row();
        let id = row.id;
        let live = row.into_live().unwrap();

        assert_eq!(live.id, AuctionId::from_uuid(id));
        assert_eq!(live.status, AuctionStatus::Active);
        assert_eq!(live.current_bid, Money::from_str("105.00").unwrap());
        assert_eq!(live.total_bids, 2);
        assert!(live.bid_history.is_empty());
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let mut row = sample_row();
        row.status = "open".to_string();
        assert!(matches!(
            row.into_live(),
            Err(ColdStoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_negative_amount_is_corrupt() {
        let mut row = sample_row();
        row.current_bid = Decimal::new(-1, 2);
        assert!(matches!(
            row.into_live(),
            Err(ColdStoreError::Corrupt { .. })
        ));
    }
}
