//! Finalization triggers
//!
//! Trigger A: a delayed `finalize-{auction}` job submitted at the end
//! time, superseded with a later run time on every extension. Trigger B:
//! the hot store's end-of-life notification enqueues the same job key,
//! so duplicate triggers coalesce before they ever reach the settle
//! routine.

use std::sync::Arc;

use bidding::FinalizationHook;
use chrono::{DateTime, Utc};
use hot_state::ExpiryEvent;
use jobs::{JobRunner, Queue};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use types::prelude::AuctionId;

/// `finalize-auction` job payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalizePayload {
    pub auction_id: AuctionId,
}

impl FinalizePayload {
    /// Natural key: one finalize schedule per auction
    pub fn job_key(&self) -> String {
        format!("finalize-{}", self.auction_id)
    }
}

/// Submits and re-schedules finalize jobs
pub struct FinalizationScheduler {
    jobs: Arc<JobRunner>,
}

impl FinalizationScheduler {
    pub fn new(jobs: Arc<JobRunner>) -> Self {
        Self { jobs }
    }

    /// Trigger A: (re-)schedule finalization at the auction's end time
    pub fn schedule(&self, auction_id: AuctionId, end_time: DateTime<Utc>) {
        let payload = FinalizePayload { auction_id };
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.jobs
                    .reschedule(Queue::FinalizeAuction, &payload.job_key(), value, end_time);
                debug!(auction_id = %auction_id, %end_time, "finalization scheduled");
            }
            Err(err) => error!(auction_id = %auction_id, %err, "finalize payload serialization"),
        }
    }

    /// Trigger B: enqueue finalization now; coalesces with a pending
    /// trigger-A job for the same auction
    pub fn trigger_now(&self, auction_id: AuctionId) {
        let payload = FinalizePayload { auction_id };
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.jobs
                    .submit(Queue::FinalizeAuction, &payload.job_key(), value);
            }
            Err(err) => error!(auction_id = %auction_id, %err, "finalize payload serialization"),
        }
    }
}

impl FinalizationHook for FinalizationScheduler {
    fn schedule_finalization(&self, auction_id: AuctionId, end_time: DateTime<Utc>) {
        self.schedule(auction_id, end_time);
    }
}

/// Drive trigger B from the hot store's expiry notifications
pub fn spawn_expiry_listener(
    scheduler: Arc<FinalizationScheduler>,
    mut expiry_rx: mpsc::UnboundedReceiver<ExpiryEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = expiry_rx.recv().await {
            match event {
                ExpiryEvent::EndOfLife { auction_id, .. } => {
                    debug!(auction_id = %auction_id, "end-of-life trigger");
                    scheduler.trigger_now(auction_id);
                }
                ExpiryEvent::Evicted { .. } => {}
            }
        }
    })
}
