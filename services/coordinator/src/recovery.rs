//! Startup recovery
//!
//! After a crash the hot store is empty while the cold store still says
//! `active`. Recovery re-hydrates every active row, re-arms trigger A
//! for auctions still running, and immediately enqueues finalization for
//! auctions whose end time passed while the process was down.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::Utc;
use cold_store::{ColdStore, ColdStoreError};
use hot_state::HotStore;
use thiserror::Error;
use tracing::info;
use types::prelude::LiveAuction;

use crate::scheduler::FinalizationScheduler;

/// Where recovery reads active auctions from
#[async_trait]
pub trait ActiveAuctionSource: Send + Sync {
    async fn load_active_auctions(&self) -> AnyResult<Vec<LiveAuction>>;
}

#[async_trait]
impl ActiveAuctionSource for ColdStore {
    async fn load_active_auctions(&self) -> AnyResult<Vec<LiveAuction>> {
        Ok(ColdStore::load_active_auctions(self).await?)
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("recovery source error: {0}")]
    Source(String),

    #[error(transparent)]
    Cold(#[from] ColdStoreError),
}

/// What one recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rows installed into the hot store by this pass
    pub hydrated: usize,
    /// Auctions with a future end time, re-armed on the timer
    pub scheduled: usize,
    /// Auctions already past their end, finalized immediately
    pub finalized_immediately: usize,
}

/// Run one recovery pass
pub async fn recover(
    hot: &Arc<HotStore>,
    source: &dyn ActiveAuctionSource,
    scheduler: &FinalizationScheduler,
) -> Result<RecoveryReport, RecoveryError> {
    let active = source
        .load_active_auctions()
        .await
        .map_err(|err| RecoveryError::Source(err.to_string()))?;

    let now = Utc::now();
    let mut report = RecoveryReport::default();

    for auction in active {
        let auction_id = auction.id;
        let end_time = auction.end_time;

        if hot.install(auction) {
            report.hydrated += 1;
        }

        if end_time <= now {
            scheduler.trigger_now(auction_id);
            report.finalized_immediately += 1;
        } else {
            scheduler.schedule(auction_id, end_time);
            report.scheduled += 1;
        }
    }

    info!(
        hydrated = report.hydrated,
        scheduled = report.scheduled,
        finalized_immediately = report.finalized_immediately,
        "recovery complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hot_state::HotStoreConfig;
    use jobs::{JobRunner, RunnerConfig};
    use std::sync::Mutex;
    use types::prelude::*;

    struct MemoryActiveSource {
        auctions: Mutex<Vec<LiveAuction>>,
    }

    #[async_trait]
    impl ActiveAuctionSource for MemoryActiveSource {
        async fn load_active_auctions(&self) -> AnyResult<Vec<LiveAuction>> {
            Ok(self.auctions.lock().unwrap().clone())
        }
    }

    fn auction_ending_in(secs: i64) -> LiveAuction {
        let now = Utc::now();
        LiveAuction::new(
            AuctionId::new(),
            UserId::new(),
            Money::from_u64(100),
            Money::from_u64(5),
            None,
            now - Duration::seconds(600),
            now + Duration::seconds(secs),
            AuctionStatus::Active,
        )
    }

    #[tokio::test]
    async fn test_recovery_hydrates_and_schedules() {
        let (hot, _rx) = HotStore::new(HotStoreConfig::default());
        let hot = Arc::new(hot);
        let runner = Arc::new(JobRunner::new(RunnerConfig::default()));
        let scheduler = FinalizationScheduler::new(Arc::clone(&runner));

        let running = auction_ending_in(120);
        let overdue = auction_ending_in(-60);
        let running_id = running.id;
        let overdue_id = overdue.id;
        let source = MemoryActiveSource {
            auctions: Mutex::new(vec![running, overdue]),
        };

        let report = recover(&hot, &source, &scheduler).await.unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                hydrated: 2,
                scheduled: 1,
                finalized_immediately: 1,
            }
        );
        assert!(hot.get(running_id).is_some());
        assert!(hot.get(overdue_id).is_some());
        assert!(runner.is_pending(&format!("finalize-{}", running_id)));
        assert!(runner.is_pending(&format!("finalize-{}", overdue_id)));
    }

    #[tokio::test]
    async fn test_recovery_is_idempotent_across_restarts() {
        let (hot, _rx) = HotStore::new(HotStoreConfig::default());
        let hot = Arc::new(hot);
        let runner = Arc::new(JobRunner::new(RunnerConfig::default()));
        let scheduler = FinalizationScheduler::new(Arc::clone(&runner));

        let auction = auction_ending_in(120);
        let source = MemoryActiveSource {
            auctions: Mutex::new(vec![auction]),
        };

        let first = recover(&hot, &source, &scheduler).await.unwrap();
        assert_eq!(first.hydrated, 1);

        // A second pass (e.g. supervisor restart loop) installs nothing
        // new and merely re-arms the timer
        let second = recover(&hot, &source, &scheduler).await.unwrap();
        assert_eq!(second.hydrated, 0);
        assert_eq!(second.scheduled, 1);
        assert_eq!(runner.stats().pending, 1);
    }
}
