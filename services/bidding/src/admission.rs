//! Admission pipeline
//!
//! The entry point for every bid request. The hot store's `place_bid`
//! is the single commit point: everything before it may reject cheaply,
//! everything after it is write-down and notification for a bid that
//! already happened.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cold_store::ColdStore;
use fanout::FanoutBus;
use hot_state::HotStore;
use jobs::{JobRunner, Queue};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use types::prelude::*;

use crate::extension::ExtensionPolicy;
use crate::payloads::{MirrorPayload, PersistBidPayload};
use crate::rate_limit::RateGate;

/// One bid request as it arrives from the gateway
#[derive(Debug, Clone)]
pub struct BidRequest {
    pub auction_id: AuctionId,
    pub bidder_id: UserId,
    pub bidder_username: String,
    pub amount: Money,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The unicast acknowledgement for an admitted bid
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedBid {
    pub auction_id: AuctionId,
    pub amount: Money,
    pub bidder_id: UserId,
    pub bidder_username: String,
    pub timestamp: DateTime<Utc>,
    pub total_bids: u64,
    pub extension: Option<ExtensionInfo>,
}

/// Admission failure: a business rejection or an infrastructure fault
///
/// There is no partial accept. Infrastructure faults only occur before
/// the commit point (hydration reads); after OK, persistence retries are
/// invisible to the client.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Rejected(#[from] BidRejection),

    #[error("bid failed: {0}")]
    Infrastructure(String),
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::Rejected(rejection) => rejection.code(),
            AdmissionError::Infrastructure(_) => "BID_FAILED",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AdmissionError::Rejected(rejection) => rejection.details(),
            AdmissionError::Infrastructure(_) => None,
        }
    }
}

/// Where hydration reads auctions from (the cold store in production)
#[async_trait]
pub trait AuctionSource: Send + Sync {
    async fn load_auction(&self, auction_id: AuctionId) -> AnyResult<Option<LiveAuction>>;
}

#[async_trait]
impl AuctionSource for ColdStore {
    async fn load_auction(&self, auction_id: AuctionId) -> AnyResult<Option<LiveAuction>> {
        Ok(ColdStore::load_auction(self, auction_id).await?)
    }
}

/// The one thing admission asks of the coordinator
///
/// This seam breaks the admission/coordinator cycle: admission schedules
/// finalization, the coordinator never calls back into admission, and
/// both talk to the hot store directly.
pub trait FinalizationHook: Send + Sync {
    fn schedule_finalization(&self, auction_id: AuctionId, end_time: DateTime<Utc>);
}

/// The admission service
pub struct AdmissionService {
    hot: Arc<HotStore>,
    source: Arc<dyn AuctionSource>,
    bus: FanoutBus,
    jobs: Arc<JobRunner>,
    gate: RateGate,
    extension: ExtensionPolicy,
    finalization: Arc<dyn FinalizationHook>,
}

impl AdmissionService {
    pub fn new(
        hot: Arc<HotStore>,
        source: Arc<dyn AuctionSource>,
        bus: FanoutBus,
        jobs: Arc<JobRunner>,
        gate: RateGate,
        extension: ExtensionPolicy,
        finalization: Arc<dyn FinalizationHook>,
    ) -> Self {
        Self {
            hot,
            source,
            bus,
            jobs,
            gate,
            extension,
            finalization,
        }
    }

    /// Process one bid request end to end
    pub async fn place_bid(&self, request: BidRequest) -> Result<AcceptedBid, AdmissionError> {
        let server_time = Utc::now();

        // 1. Rate gate, before the hot store is touched
        if !self.gate.try_acquire(request.bidder_id) {
            return Err(BidRejection::RateLimited.into());
        }

        // 2. Atomic admission, with exactly one lazy-hydration retry on
        //    a miss
        let accepted = match self.hot.place_bid(
            request.auction_id,
            request.amount,
            request.bidder_id,
            server_time,
            None,
        ) {
            Ok(accepted) => accepted,
            Err(BidRejection::NotFound) => {
                self.hydrate(request.auction_id).await?;
                self.hot
                    .place_bid(
                        request.auction_id,
                        request.amount,
                        request.bidder_id,
                        server_time,
                        None,
                    )
                    .map_err(AdmissionError::Rejected)?
            }
            Err(rejection) => return Err(rejection.into()),
        };

        // 3. Write-down jobs; the truth is already committed
        let persist = PersistBidPayload {
            bid_id: BidId::new(),
            auction_id: request.auction_id,
            bidder_id: request.bidder_id,
            amount: request.amount,
            bid_time: server_time,
            previous_bid: accepted.previous_bid,
            total_bids: accepted.total_bids,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        };
        self.submit_job(Queue::PersistBid, &persist.job_key(), &persist, false);

        let mirror = MirrorPayload {
            auction_id: request.auction_id,
            current_bid: request.amount,
            highest_bidder_id: Some(request.bidder_id),
            total_bids: accepted.total_bids,
            end_time: None,
        };
        self.submit_job(Queue::UpdateAuctionMirror, &mirror.job_key(), &mirror, true);

        // 4. Anti-snipe extension, then re-schedule finalization
        let extension = self
            .extension
            .apply(&self.hot, request.auction_id, server_time);
        if let Some(info) = &extension {
            let mirror = MirrorPayload {
                end_time: Some(info.new_end_time),
                ..mirror
            };
            self.submit_job(Queue::UpdateAuctionMirror, &mirror.job_key(), &mirror, true);
            self.finalization
                .schedule_finalization(request.auction_id, info.new_end_time);
        }

        // 5. Publish strictly after the commit
        self.bus.publish(AuctionEvent::BidPlaced {
            auction_id: request.auction_id,
            bid: BidBroadcast {
                amount: request.amount,
                bidder_id: request.bidder_id,
                bidder_username: request.bidder_username.clone(),
                timestamp: server_time,
                total_bids: accepted.total_bids,
            },
            extension: extension.clone(),
        });

        info!(
            auction_id = %request.auction_id,
            bidder_id = %request.bidder_id,
            amount = %request.amount,
            total_bids = accepted.total_bids,
            extended = extension.is_some(),
            "bid accepted"
        );

        Ok(AcceptedBid {
            auction_id: request.auction_id,
            amount: request.amount,
            bidder_id: request.bidder_id,
            bidder_username: request.bidder_username,
            timestamp: server_time,
            total_bids: accepted.total_bids,
            extension,
        })
    }

    /// Load a cold row into the hot store after a miss
    ///
    /// Put-if-absent: when two requests race the hydration, one install
    /// wins and both retries proceed against the same record.
    async fn hydrate(&self, auction_id: AuctionId) -> Result<(), AdmissionError> {
        let loaded = self
            .source
            .load_auction(auction_id)
            .await
            .map_err(|err| AdmissionError::Infrastructure(err.to_string()))?;

        let Some(live) = loaded else {
            return Err(BidRejection::NotFound.into());
        };

        let end_time = live.end_time;
        let is_active = live.status == AuctionStatus::Active;
        if self.hot.install(live) && is_active {
            self.finalization
                .schedule_finalization(auction_id, end_time);
        }
        debug!(auction_id = %auction_id, "lazy hydration complete");
        Ok(())
    }

    /// Serialize and enqueue; `replace` supersedes a pending job with
    /// the same key (the mirror queue's single-writer-per-auction rule)
    fn submit_job<P: Serialize>(&self, queue: Queue, key: &str, payload: &P, replace: bool) {
        match serde_json::to_value(payload) {
            Ok(value) => {
                if replace {
                    self.jobs.reschedule(queue, key, value, Utc::now());
                } else {
                    self.jobs.submit(queue, key, value);
                }
            }
            Err(err) => {
                // The bid is already committed; losing the job loses
                // only write-down latency, recovery re-mirrors at rest
                error!(%queue, key, %err, "failed to serialize job payload");
            }
        }
    }
}
