//! The idempotent settlement routine
//!
//! `settle` is safe to call from any trigger, any number of times. The
//! hot-store finalize primitive is the gate: its single `Ok` drives the
//! mirror write and the one `auction-ended` publish; every other caller
//! lands in the `AlreadyFinal` arm and only re-asserts the mirror write.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cold_store::ColdStore;
use fanout::FanoutBus;
use hot_state::{FinalOutcome, HotStore};
use thiserror::Error;
use tracing::{info, warn};
use types::prelude::*;

/// Where the final state is written down (the cold store in production)
#[async_trait]
pub trait FinalizationMirror: Send + Sync {
    async fn write_finalization(
        &self,
        auction_id: AuctionId,
        winning_bid: Money,
        winner_id: Option<UserId>,
        total_bids: u64,
        end_time: DateTime<Utc>,
    ) -> AnyResult<bool>;
}

#[async_trait]
impl FinalizationMirror for ColdStore {
    async fn write_finalization(
        &self,
        auction_id: AuctionId,
        winning_bid: Money,
        winner_id: Option<UserId>,
        total_bids: u64,
        end_time: DateTime<Utc>,
    ) -> AnyResult<bool> {
        Ok(ColdStore::write_finalization(
            self, auction_id, winning_bid, winner_id, total_bids, end_time,
        )
        .await?)
    }
}

/// What a settle call observed
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// This call won the commit and published the end event
    Settled(FinalOutcome),
    /// Another trigger already committed; the mirror write was re-asserted
    AlreadyFinal,
    /// The record is gone from the hot store (past retention)
    Skipped,
}

#[derive(Debug, Error)]
pub enum SettleError {
    /// The auction has not reached its (possibly extended) end time
    #[error("auction not due until {0}")]
    NotDue(DateTime<Utc>),

    /// Mirror write failed; the commit and publish stand, retry the job
    #[error("finalization mirror write failed: {0}")]
    Mirror(String),
}

pub struct Finalizer {
    hot: Arc<HotStore>,
    mirror: Arc<dyn FinalizationMirror>,
    bus: FanoutBus,
}

impl Finalizer {
    pub fn new(hot: Arc<HotStore>, mirror: Arc<dyn FinalizationMirror>, bus: FanoutBus) -> Self {
        Self { hot, mirror, bus }
    }

    /// Settle one auction
    pub async fn settle(
        &self,
        auction_id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<Settlement, SettleError> {
        match self.hot.finalize(auction_id, now) {
            Ok(outcome) => {
                // The no-bid case mirrors the resting starting price
                let mirror_bid = match outcome.winning_bid {
                    Some(amount) => amount,
                    None => self
                        .hot
                        .get(auction_id)
                        .map(|live| live.current_bid)
                        .unwrap_or(Money::ZERO),
                };
                let mirror_result = self
                    .mirror
                    .write_finalization(
                        auction_id,
                        mirror_bid,
                        outcome.winner_id,
                        outcome.total_bids,
                        outcome.end_time,
                    )
                    .await;

                // Published exactly once: only the winning finalize call
                // reaches this point, mirror outcome notwithstanding
                self.bus.publish(AuctionEvent::AuctionEnded {
                    auction_id,
                    winner_id: outcome.winner_id,
                    winning_bid: outcome.winning_bid,
                    total_bids: outcome.total_bids,
                    end_time: outcome.end_time,
                });

                info!(
                    auction_id = %auction_id,
                    winner = ?outcome.winner_id,
                    total_bids = outcome.total_bids,
                    "auction settled"
                );

                mirror_result.map_err(|err| SettleError::Mirror(err.to_string()))?;
                Ok(Settlement::Settled(outcome))
            }
            Err(FinalizeError::AlreadyFinal) => {
                // A redelivered trigger, or the retry after a mirror
                // failure: re-assert the (idempotent) mirror write, never
                // re-publish
                if let Some(live) = self.hot.get(auction_id) {
                    if live.status == AuctionStatus::Ended {
                        self.mirror
                            .write_finalization(
                                auction_id,
                                live.current_bid,
                                live.highest_bidder_id,
                                live.total_bids,
                                live.end_time,
                            )
                            .await
                            .map_err(|err| SettleError::Mirror(err.to_string()))?;
                    }
                }
                Ok(Settlement::AlreadyFinal)
            }
            Err(FinalizeError::NotEnded { end_time }) => Err(SettleError::NotDue(end_time)),
            Err(FinalizeError::NotFound) => {
                warn!(auction_id = %auction_id, "finalize trigger for evicted auction");
                Ok(Settlement::Skipped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hot_state::HotStoreConfig;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// Records mirror writes; optionally fails the first call
    #[derive(Default)]
    struct MemoryMirror {
        writes: AtomicU32,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl FinalizationMirror for MemoryMirror {
        async fn write_finalization(
            &self,
            _auction_id: AuctionId,
            _winning_bid: Money,
            _winner_id: Option<UserId>,
            _total_bids: u64,
            _end_time: DateTime<Utc>,
        ) -> AnyResult<bool> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct Fixture {
        finalizer: Arc<Finalizer>,
        hot: Arc<HotStore>,
        mirror: Arc<MemoryMirror>,
        bus: FanoutBus,
    }

    fn fixture() -> Fixture {
        let (hot, _rx) = HotStore::new(HotStoreConfig::default());
        let hot = Arc::new(hot);
        let mirror = Arc::new(MemoryMirror::default());
        let bus = FanoutBus::with_defaults();
        let finalizer = Arc::new(Finalizer::new(
            Arc::clone(&hot),
            Arc::clone(&mirror) as Arc<dyn FinalizationMirror>,
            bus.clone(),
        ));
        Fixture {
            finalizer,
            hot,
            mirror,
            bus,
        }
    }

    fn auction_ending_at(end_secs: i64) -> LiveAuction {
        LiveAuction::new(
            AuctionId::new(),
            UserId::new(),
            Money::from_str("100.00").unwrap(),
            Money::from_str("5.00").unwrap(),
            None,
            at(end_secs - 100),
            at(end_secs),
            AuctionStatus::Active,
        )
    }

    #[tokio::test]
    async fn test_settle_publishes_once_with_winner() {
        let fixture = fixture();
        let mut subscriber = fixture.bus.subscribe();

        let auction = auction_ending_at(1000);
        let auction_id = auction.id;
        fixture.hot.install(auction);
        let bidder = UserId::new();
        fixture
            .hot
            .place_bid(auction_id, Money::from_str("100.00").unwrap(), bidder, at(900), None)
            .unwrap();

        let settlement = fixture.finalizer.settle(auction_id, at(1000)).await.unwrap();
        match settlement {
            Settlement::Settled(outcome) => {
                assert_eq!(outcome.winner_id, Some(bidder));
                assert_eq!(outcome.winning_bid, Some(Money::from_str("100.00").unwrap()));
            }
            other => panic!("expected Settled, got {:?}", other),
        }

        match subscriber.try_recv().unwrap() {
            AuctionEvent::AuctionEnded {
                winner_id,
                winning_bid,
                total_bids,
                ..
            } => {
                assert_eq!(winner_id, Some(bidder));
                assert_eq!(winning_bid, Some(Money::from_str("100.00").unwrap()));
                assert_eq!(total_bids, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(subscriber.try_recv().is_none());
        assert_eq!(fixture.mirror.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_triggers_are_noops() {
        let fixture = fixture();
        let mut subscriber = fixture.bus.subscribe();

        let auction = auction_ending_at(1000);
        let auction_id = auction.id;
        fixture.hot.install(auction);

        let first = fixture.finalizer.settle(auction_id, at(1000)).await.unwrap();
        assert!(matches!(first, Settlement::Settled(_)));

        for _ in 0..3 {
            let again = fixture.finalizer.settle(auction_id, at(1005)).await.unwrap();
            assert_eq!(again, Settlement::AlreadyFinal);
        }

        // Exactly one end event on the bus
        assert!(subscriber.try_recv().is_some());
        assert!(subscriber.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_settle_exactly_once() {
        let fixture = fixture();
        let mut subscriber = fixture.bus.subscribe();

        let auction = auction_ending_at(1000);
        let auction_id = auction.id;
        fixture.hot.install(auction);

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let finalizer = Arc::clone(&fixture.finalizer);
            tasks.push(tokio::spawn(async move {
                finalizer.settle(auction_id, at(1000)).await.unwrap()
            }));
        }

        let mut settled = 0;
        let mut already = 0;
        for task in tasks {
            match task.await.unwrap() {
                Settlement::Settled(_) => settled += 1,
                Settlement::AlreadyFinal => already += 1,
                Settlement::Skipped => panic!("record must be resident"),
            }
        }
        assert_eq!((settled, already), (1, 4));

        assert!(subscriber.try_recv().is_some());
        assert!(subscriber.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_not_due_reports_end_time() {
        let fixture = fixture();
        let auction = auction_ending_at(1000);
        let auction_id = auction.id;
        fixture.hot.install(auction);

        let err = fixture.finalizer.settle(auction_id, at(990)).await.unwrap_err();
        assert!(matches!(err, SettleError::NotDue(end) if end == at(1000)));
    }

    #[tokio::test]
    async fn test_mirror_failure_retry_does_not_republish() {
        let fixture = fixture();
        let mut subscriber = fixture.bus.subscribe();

        let auction = auction_ending_at(1000);
        let auction_id = auction.id;
        fixture.hot.install(auction);
        fixture.mirror.fail_next.store(true, Ordering::SeqCst);

        // First call commits and publishes, but the mirror write fails
        let err = fixture.finalizer.settle(auction_id, at(1000)).await;
        assert!(matches!(err, Err(SettleError::Mirror(_))));
        assert!(subscriber.try_recv().is_some());

        // The retry completes the mirror write without a second publish
        let retry = fixture.finalizer.settle(auction_id, at(1001)).await.unwrap();
        assert_eq!(retry, Settlement::AlreadyFinal);
        assert_eq!(fixture.mirror.writes.load(Ordering::SeqCst), 1);
        assert!(subscriber.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_no_bid_auction_settles_without_winner() {
        let fixture = fixture();
        let mut subscriber = fixture.bus.subscribe();

        let auction = auction_ending_at(1000);
        let auction_id = auction.id;
        fixture.hot.install(auction);

        fixture.finalizer.settle(auction_id, at(1000)).await.unwrap();

        match subscriber.try_recv().unwrap() {
            AuctionEvent::AuctionEnded {
                winner_id,
                winning_bid,
                total_bids,
                ..
            } => {
                assert_eq!(winner_id, None);
                assert_eq!(winning_bid, None);
                assert_eq!(total_bids, 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_evicted_auction_is_skipped() {
        let fixture = fixture();
        let settlement = fixture
            .finalizer
            .settle(AuctionId::new(), Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(settlement, Settlement::Skipped);
    }
}
