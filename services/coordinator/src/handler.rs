//! Write-down job handler
//!
//! Executes the three queues against the cold store and the settle
//! routine. Handlers classify failures only: malformed payloads are
//! permanent, infrastructure errors are transient, a finalize trigger
//! that fired before an extended end time re-arms itself.

use std::sync::Arc;

use async_trait::async_trait;
use bidding::payloads::{MirrorPayload, PersistBidPayload};
use chrono::Utc;
use cold_store::ColdStore;
use jobs::{Job, JobError, JobHandler, Queue};
use tracing::debug;

use crate::finalizer::{Finalizer, SettleError};
use crate::scheduler::FinalizePayload;

pub struct WriteDownHandler {
    cold: ColdStore,
    finalizer: Arc<Finalizer>,
}

impl WriteDownHandler {
    pub fn new(cold: ColdStore, finalizer: Arc<Finalizer>) -> Self {
        Self { cold, finalizer }
    }

    fn decode<P: serde::de::DeserializeOwned>(job: &Job) -> Result<P, JobError> {
        serde_json::from_value(job.payload.clone())
            .map_err(|err| JobError::Permanent(format!("bad {} payload: {}", job.queue, err)))
    }
}

#[async_trait]
impl JobHandler for WriteDownHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match job.queue {
            Queue::PersistBid => {
                let payload: PersistBidPayload = Self::decode(job)?;
                let inserted = self
                    .cold
                    .insert_bid(&payload.into_new_bid())
                    .await
                    .map_err(|err| JobError::Transient(err.to_string()))?;
                if !inserted {
                    debug!(key = %job.key, "bid row already persisted");
                }
                Ok(())
            }
            Queue::UpdateAuctionMirror => {
                let payload: MirrorPayload = Self::decode(job)?;
                // A false return means the row already left `active`;
                // the finalization write owns it from here
                self.cold
                    .update_mirror(
                        payload.auction_id,
                        payload.current_bid,
                        payload.highest_bidder_id,
                        payload.total_bids,
                        payload.end_time,
                    )
                    .await
                    .map_err(|err| JobError::Transient(err.to_string()))?;
                Ok(())
            }
            Queue::FinalizeAuction => {
                let payload: FinalizePayload = Self::decode(job)?;
                match self.finalizer.settle(payload.auction_id, Utc::now()).await {
                    Ok(_) => Ok(()),
                    Err(SettleError::NotDue(end_time)) => Err(JobError::RetryAt(end_time)),
                    Err(SettleError::Mirror(reason)) => Err(JobError::Transient(reason)),
                }
            }
        }
    }
}
