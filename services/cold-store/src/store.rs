//! Postgres adapter
//!
//! All statements are runtime-bound (no compile-time query checking) so
//! the workspace builds without a reachable database. Mirror updates are
//! conditional on `status = 'active'` to avoid resurrecting ended
//! auctions; the finalization write is the single exception and is the
//! only statement that moves a row out of `active`.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::prelude::*;
use uuid::Uuid;

use crate::rows::{AuctionRow, BidRow, NewBid};

/// Embedded schema, applied idempotently at startup
const SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Error)]
pub enum ColdStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupted auction row {auction_id}: {reason}")]
    Corrupt { auction_id: Uuid, reason: String },
}

/// Durable store handle
///
/// Cheap to clone; wraps the process-wide connection pool.
#[derive(Clone)]
pub struct ColdStore {
    pool: PgPool,
}

impl ColdStore {
    /// Connect a new pool
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ColdStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared pools)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema, statement by statement
    pub async fn apply_schema(&self) -> Result<(), ColdStoreError> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }
        info!("cold store schema applied");
        Ok(())
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), ColdStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert a user row (seeding and auth bootstrap)
    pub async fn ensure_user(&self, id: UserId, username: &str) -> Result<(), ColdStoreError> {
        sqlx::query(
            "INSERT INTO users (id, username) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username",
        )
        .bind(id.as_uuid())
        .bind(username)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert the catalogue row for a new auction
    pub async fn create_auction(
        &self,
        auction: &LiveAuction,
        title: &str,
        description: &str,
        category: Option<&str>,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "INSERT INTO auctions (
                 id, seller_id, title, description, category,
                 starting_price, reserve_price, current_bid, bid_increment,
                 highest_bidder_id, total_bids,
                 start_time, end_time, original_end_time, status
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(auction.id.as_uuid())
        .bind(auction.seller_id.as_uuid())
        .bind(title)
        .bind(description)
        .bind(category)
        .bind(auction.starting_price.as_decimal())
        .bind(auction.reserve_price.map(|m| m.as_decimal()))
        .bind(auction.current_bid.as_decimal())
        .bind(auction.bid_increment.as_decimal())
        .bind(auction.highest_bidder_id.map(|u| *u.as_uuid()))
        .bind(auction.total_bids as i64)
        .bind(auction.start_time)
        .bind(auction.end_time)
        .bind(auction.original_end_time)
        .bind(auction.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one accepted bid, idempotently
    ///
    /// Returns `false` when the primary key already exists (a redelivered
    /// persistence job), which callers treat as success.
    pub async fn insert_bid(&self, bid: &NewBid) -> Result<bool, ColdStoreError> {
        let result = sqlx::query(
            "INSERT INTO bids (
                 id, auction_id, bidder_id, amount, bid_time,
                 previous_bid, is_winning, ip_address, user_agent
             ) VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(bid.bid_id.as_uuid())
        .bind(bid.auction_id.as_uuid())
        .bind(bid.bidder_id.as_uuid())
        .bind(bid.amount.as_decimal())
        .bind(bid.bid_time)
        .bind(bid.previous_bid.as_decimal())
        .bind(bid.ip_address.as_deref())
        .bind(bid.user_agent.as_deref())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(bid_id = %bid.bid_id, "duplicate bid insert coalesced");
        }
        Ok(inserted)
    }

    /// Mirror a hot-store mutation onto the auctions row
    ///
    /// Guarded by `status = 'active'`, and monotone on `total_bids` so a
    /// redelivered stale update cannot roll the row backwards. Returns
    /// `false` when a guard filtered the write.
    pub async fn update_mirror(
        &self,
        auction_id: AuctionId,
        current_bid: Money,
        highest_bidder_id: Option<UserId>,
        total_bids: u64,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<bool, ColdStoreError> {
        let result = sqlx::query(
            "UPDATE auctions SET
                 current_bid = $2,
                 highest_bidder_id = $3,
                 total_bids = $4,
                 end_time = COALESCE($5, end_time),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'active' AND total_bids <= $4",
        )
        .bind(auction_id.as_uuid())
        .bind(current_bid.as_decimal())
        .bind(highest_bidder_id.map(|u| *u.as_uuid()))
        .bind(total_bids as i64)
        .bind(end_time)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() == 1;
        if !updated {
            warn!(auction_id = %auction_id, "mirror update filtered: row ended or newer");
        }
        Ok(updated)
    }

    /// The finalization write: `active -> ended` plus the final values
    ///
    /// Idempotent: a redelivered job finds the row already ended and
    /// affects nothing.
    pub async fn write_finalization(
        &self,
        auction_id: AuctionId,
        winning_bid: Money,
        winner_id: Option<UserId>,
        total_bids: u64,
        end_time: DateTime<Utc>,
    ) -> Result<bool, ColdStoreError> {
        let result = sqlx::query(
            "UPDATE auctions SET
                 status = 'ended',
                 current_bid = $2,
                 highest_bidder_id = $3,
                 total_bids = $4,
                 end_time = $5,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'active'",
        )
        .bind(auction_id.as_uuid())
        .bind(winning_bid.as_decimal())
        .bind(winner_id.map(|u| *u.as_uuid()))
        .bind(total_bids as i64)
        .bind(end_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Load one auction row
    pub async fn load_auction_row(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<AuctionRow>, ColdStoreError> {
        let row = sqlx::query_as::<_, AuctionRow>("SELECT * FROM auctions WHERE id = $1")
            .bind(auction_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Load one auction as a live record (hydration path)
    pub async fn load_auction(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<LiveAuction>, ColdStoreError> {
        match self.load_auction_row(auction_id).await? {
            Some(row) => Ok(Some(row.into_live()?)),
            None => Ok(None),
        }
    }

    /// Move due scheduled auctions to active, returning the flipped rows
    ///
    /// The returned rows are what the caller hydrates and arms timers
    /// for; a row is returned by exactly one activation sweep.
    pub async fn activate_due_auctions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuctionRow>, ColdStoreError> {
        let rows = sqlx::query_as::<_, AuctionRow>(
            "UPDATE auctions SET status = 'active', updated_at = NOW()
             WHERE status = 'scheduled' AND start_time <= $1
             RETURNING *",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All active auctions, soonest end first (crash recovery)
    pub async fn load_active_auctions(&self) -> Result<Vec<LiveAuction>, ColdStoreError> {
        let rows = sqlx::query_as::<_, AuctionRow>(
            "SELECT * FROM auctions WHERE status = 'active' ORDER BY end_time ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuctionRow::into_live).collect()
    }

    /// Catalogue listing with optional status/category filters
    pub async fn list_auctions(
        &self,
        status: Option<&str>,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuctionRow>, ColdStoreError> {
        let rows = sqlx::query_as::<_, AuctionRow>(
            "SELECT * FROM auctions
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR category = $2)
             ORDER BY end_time ASC
             LIMIT $3 OFFSET $4",
        )
        .bind(status)
        .bind(category)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Append-only bid log for one auction, in amount order
    pub async fn bids_for_auction(
        &self,
        auction_id: AuctionId,
    ) -> Result<Vec<BidRow>, ColdStoreError> {
        let rows = sqlx::query_as::<_, BidRow>(
            "SELECT * FROM bids WHERE auction_id = $1 ORDER BY amount ASC",
        )
        .bind(auction_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Number of logged bids for one auction
    pub async fn count_bids(&self, auction_id: AuctionId) -> Result<i64, ColdStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bids WHERE auction_id = $1")
            .bind(auction_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn live_auction(seller: UserId) -> LiveAuction {
        let now = Utc::now();
        LiveAuction::new(
            AuctionId::new(),
            seller,
            Money::from_str("100.00").unwrap(),
            Money::from_str("5.00").unwrap(),
            None,
            now,
            now + Duration::seconds(120),
            AuctionStatus::Active,
        )
    }

    async fn connected_store() -> ColdStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = ColdStore::connect(&url, 5).await.unwrap();
        store.apply_schema().await.unwrap();
        store
    }

    // Requires a reachable Postgres; run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_bid_insert_is_idempotent() {
        let store = connected_store().await;

        let seller = UserId::new();
        let bidder = UserId::new();
        store.ensure_user(seller, "seller").await.unwrap();
        store.ensure_user(bidder, "bidder").await.unwrap();

        let auction = live_auction(seller);
        store
            .create_auction(&auction, "Walnut desk", "", Some("furniture"))
            .await
            .unwrap();

        let bid = NewBid {
            bid_id: BidId::new(),
            auction_id: auction.id,
            bidder_id: bidder,
            amount: Money::from_str("100.00").unwrap(),
            bid_time: Utc::now(),
            previous_bid: Money::from_str("100.00").unwrap(),
            ip_address: None,
            user_agent: None,
        };

        assert!(store.insert_bid(&bid).await.unwrap());
        // Redelivery coalesces on the primary key
        assert!(!store.insert_bid(&bid).await.unwrap());
        assert_eq!(store.count_bids(auction.id).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_mirror_guard_blocks_after_finalization() {
        let store = connected_store().await;

        let seller = UserId::new();
        let bidder = UserId::new();
        store.ensure_user(seller, "seller").await.unwrap();
        store.ensure_user(bidder, "bidder").await.unwrap();

        let auction = live_auction(seller);
        store
            .create_auction(&auction, "Brass lamp", "", None)
            .await
            .unwrap();

        let amount = Money::from_str("105.00").unwrap();
        assert!(store
            .update_mirror(auction.id, amount, Some(bidder), 1, None)
            .await
            .unwrap());

        assert!(store
            .write_finalization(auction.id, amount, Some(bidder), 1, auction.end_time)
            .await
            .unwrap());
        // Redelivered finalization is a no-op
        assert!(!store
            .write_finalization(auction.id, amount, Some(bidder), 1, auction.end_time)
            .await
            .unwrap());

        // Ordinary mirror writes can no longer touch the ended row
        assert!(!store
            .update_mirror(auction.id, amount, Some(bidder), 2, None)
            .await
            .unwrap());

        let row = store.load_auction_row(auction.id).await.unwrap().unwrap();
        assert_eq!(row.status, "ended");
    }
}
