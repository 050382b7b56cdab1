//! Hot store core
//!
//! Keyed store of live auction records with three atomic primitives:
//! `place_bid`, `extend`, and `finalize`. Each primitive runs while
//! holding the record's keyed guard, so concurrent calls targeting the
//! same auction are linearized; the active index is only ever touched
//! while a record guard is held, giving a single lock order.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use types::prelude::*;

use crate::index::ActiveIndex;

/// Hot store tuning
#[derive(Debug, Clone)]
pub struct HotStoreConfig {
    /// How long a record outlives its end time before eviction
    pub retention: Duration,
}

impl Default for HotStoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::seconds(86_400),
        }
    }
}

/// Expiry notifications emitted by the sweep
///
/// `EndOfLife` fires once when an auction's end time passes and is the
/// backup finalization trigger; `Evicted` fires when the record leaves
/// memory after the retention window.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryEvent {
    EndOfLife {
        auction_id: AuctionId,
        end_time: DateTime<Utc>,
    },
    Evicted {
        auction_id: AuctionId,
    },
}

/// A live record plus its store-level bookkeeping
#[derive(Debug)]
struct LiveRecord {
    auction: LiveAuction,
    /// Whether the end-of-life notification has been emitted
    end_marker_fired: bool,
    /// When the record leaves memory
    evict_at: DateTime<Utc>,
}

/// Successful result of `place_bid`
#[derive(Debug, Clone, PartialEq)]
pub struct BidAccepted {
    pub previous_bid: Money,
    pub previous_bidder_id: Option<UserId>,
    pub total_bids: u64,
}

/// Result of `extend`
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendOutcome {
    Extended {
        old_end_time: DateTime<Utc>,
        new_end_time: DateTime<Utc>,
        extended_by_secs: i64,
    },
    NotExtended {
        end_time: DateTime<Utc>,
        time_remaining_secs: i64,
    },
}

/// Successful result of `finalize`
#[derive(Debug, Clone, PartialEq)]
pub struct FinalOutcome {
    /// None when the auction closed without bids
    pub winner_id: Option<UserId>,
    pub winning_bid: Option<Money>,
    pub total_bids: u64,
    pub end_time: DateTime<Utc>,
}

/// Authoritative live-auction store
pub struct HotStore {
    auctions: DashMap<AuctionId, LiveRecord>,
    index: ActiveIndex,
    retention: Duration,
    expiry_tx: mpsc::UnboundedSender<ExpiryEvent>,
}

impl HotStore {
    /// Create a store and the receiver for its expiry notifications
    pub fn new(config: HotStoreConfig) -> (Self, mpsc::UnboundedReceiver<ExpiryEvent>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        (
            Self {
                auctions: DashMap::new(),
                index: ActiveIndex::new(),
                retention: config.retention,
                expiry_tx,
            },
            expiry_rx,
        )
    }

    /// Atomic bid admission
    ///
    /// Preconditions are checked in a fixed order and the first failure
    /// returns. A positive `increment_hint` overrides the stored
    /// increment when computing the minimum; equal amounts are rejected,
    /// so the earliest committed bid wins a price level.
    pub fn place_bid(
        &self,
        auction_id: AuctionId,
        amount: Money,
        bidder_id: UserId,
        server_time: DateTime<Utc>,
        increment_hint: Option<Money>,
    ) -> Result<BidAccepted, BidRejection> {
        let mut record = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(BidRejection::NotFound)?;

        if !amount.is_positive() {
            return Err(BidRejection::InvalidAmount);
        }

        let auction = &mut record.auction;

        if auction.status != AuctionStatus::Active {
            return Err(BidRejection::NotActive {
                status: auction.status,
            });
        }

        if server_time >= auction.end_time {
            return Err(BidRejection::Ended {
                end_time: auction.end_time,
            });
        }

        if bidder_id == auction.seller_id {
            return Err(BidRejection::SellerCannotBid);
        }

        let (minimum_bid, is_first_bid) = auction.minimum_bid(increment_hint);
        if amount < minimum_bid {
            return Err(BidRejection::TooLow {
                current_bid: auction.current_bid,
                minimum_bid,
                your_bid: amount,
                is_first_bid,
            });
        }

        let applied = auction.apply_bid(bidder_id, amount, server_time);
        debug!(
            auction_id = %auction_id,
            bidder_id = %bidder_id,
            amount = %amount,
            total_bids = applied.total_bids,
            "bid admitted"
        );

        Ok(BidAccepted {
            previous_bid: applied.previous_bid,
            previous_bidder_id: applied.previous_bidder_id,
            total_bids: applied.total_bids,
        })
    }

    /// Atomic anti-snipe extension
    ///
    /// Pushes the end time out by `duration` when the bid landed with at
    /// most `threshold` left on the clock. The active index entry and the
    /// eviction deadline move with the end time.
    pub fn extend(
        &self,
        auction_id: AuctionId,
        server_time: DateTime<Utc>,
        threshold: Duration,
        duration: Duration,
    ) -> Result<ExtendOutcome, ExtendError> {
        let mut record = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(ExtendError::NotFound)?;

        if record.auction.status != AuctionStatus::Active {
            return Err(ExtendError::NotActive {
                status: record.auction.status,
            });
        }

        let remaining = record.auction.end_time - server_time;
        if remaining > Duration::zero() && remaining <= threshold {
            let old_end_time = record.auction.end_time;
            let new_end_time = old_end_time + duration;

            record.auction.end_time = new_end_time;
            record.evict_at = new_end_time + self.retention;
            record.end_marker_fired = false;
            self.index.reposition(old_end_time, new_end_time, auction_id);

            info!(
                auction_id = %auction_id,
                %old_end_time,
                %new_end_time,
                "auction extended"
            );

            Ok(ExtendOutcome::Extended {
                old_end_time,
                new_end_time,
                extended_by_secs: duration.num_seconds(),
            })
        } else {
            Ok(ExtendOutcome::NotExtended {
                end_time: record.auction.end_time,
                time_remaining_secs: remaining.num_seconds(),
            })
        }
    }

    /// Atomic finalization
    ///
    /// Exactly one caller observes `Ok`; every later call gets
    /// `AlreadyFinal`. The record stays resident for the retention window
    /// so late readers can still see the outcome.
    pub fn finalize(
        &self,
        auction_id: AuctionId,
        server_time: DateTime<Utc>,
    ) -> Result<FinalOutcome, FinalizeError> {
        let mut record = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(FinalizeError::NotFound)?;

        if server_time < record.auction.end_time {
            return Err(FinalizeError::NotEnded {
                end_time: record.auction.end_time,
            });
        }

        if record.auction.status.is_terminal() {
            return Err(FinalizeError::AlreadyFinal);
        }

        let auction = &mut record.auction;
        auction.status = AuctionStatus::Ended;
        self.index.remove(auction.end_time, auction_id);
        record.evict_at = record.auction.end_time + self.retention;

        let auction = &record.auction;
        let outcome = FinalOutcome {
            winner_id: auction.highest_bidder_id,
            winning_bid: if auction.total_bids > 0 {
                Some(auction.current_bid)
            } else {
                None
            },
            total_bids: auction.total_bids,
            end_time: auction.end_time,
        };

        info!(
            auction_id = %auction_id,
            winner = ?outcome.winner_id,
            total_bids = outcome.total_bids,
            "auction finalized"
        );

        Ok(outcome)
    }

    /// Install a record, put-if-absent
    ///
    /// Used by lazy hydration and recovery; at most one hydrator wins per
    /// key. Returns whether this call installed the record.
    pub fn install(&self, auction: LiveAuction) -> bool {
        let auction_id = auction.id;
        let evict_at = auction.end_time + self.retention;

        match self.auctions.entry(auction_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                if auction.status == AuctionStatus::Active {
                    self.index.insert(auction.end_time, auction_id);
                }
                slot.insert(LiveRecord {
                    auction,
                    end_marker_fired: false,
                    evict_at,
                });
                debug!(auction_id = %auction_id, "auction hydrated into hot store");
                true
            }
        }
    }

    /// Administrative cancellation stub
    ///
    /// No public route reaches this; it exists so the terminal
    /// `cancelled` state is representable. Bids against a cancelled
    /// auction fail with the not-active rejection.
    pub fn cancel(&self, auction_id: AuctionId) -> bool {
        let Some(mut record) = self.auctions.get_mut(&auction_id) else {
            return false;
        };
        if record.auction.status.is_terminal() {
            return false;
        }
        if record.auction.status == AuctionStatus::Active {
            self.index.remove(record.auction.end_time, auction_id);
        }
        record.auction.status = AuctionStatus::Cancelled;
        warn!(auction_id = %auction_id, "auction cancelled administratively");
        true
    }

    /// Snapshot of one auction (None after eviction)
    pub fn get(&self, auction_id: AuctionId) -> Option<LiveAuction> {
        self.auctions.get(&auction_id).map(|r| r.auction.clone())
    }

    /// Bid history snapshot, highest amount last
    pub fn bid_history(&self, auction_id: AuctionId) -> Option<Vec<BidEntry>> {
        self.auctions
            .get(&auction_id)
            .map(|r| r.auction.bid_history.clone())
    }

    /// Number of resident records (any status)
    pub fn len(&self) -> usize {
        self.auctions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.auctions.is_empty()
    }

    /// Number of active auctions in the index
    pub fn active_count(&self) -> usize {
        self.index.len()
    }

    /// The end-time-ordered active index
    pub fn index(&self) -> &ActiveIndex {
        &self.index
    }

    /// One sweep pass: emit due end-of-life notifications and evict
    /// records past their retention deadline
    ///
    /// Returns `(end_of_life, evicted)` counts. Candidates are collected
    /// first, then re-checked under the record guard, so a concurrent
    /// extension between the two passes wins.
    pub fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let mut due_markers = Vec::new();
        let mut due_evictions = Vec::new();

        for entry in self.auctions.iter() {
            let record = entry.value();
            if now >= record.evict_at {
                due_evictions.push(*entry.key());
            } else if !record.end_marker_fired && now >= record.auction.end_time {
                due_markers.push(*entry.key());
            }
        }

        let mut fired = 0;
        for auction_id in due_markers {
            if let Some(mut record) = self.auctions.get_mut(&auction_id) {
                if record.end_marker_fired || now < record.auction.end_time {
                    continue;
                }
                record.end_marker_fired = true;
                fired += 1;
                let _ = self.expiry_tx.send(ExpiryEvent::EndOfLife {
                    auction_id,
                    end_time: record.auction.end_time,
                });
            }
        }

        let mut evicted = 0;
        for auction_id in due_evictions {
            if let Some((_, record)) = self.auctions.remove(&auction_id) {
                if record.auction.status == AuctionStatus::Active {
                    // Should not happen: active auctions are finalized
                    // before their retention deadline
                    warn!(auction_id = %auction_id, "evicting auction that was never finalized");
                    self.index.remove(record.auction.end_time, auction_id);
                }
                evicted += 1;
                let _ = self.expiry_tx.send(ExpiryEvent::Evicted { auction_id });
            }
        }

        (fired, evicted)
    }
}
