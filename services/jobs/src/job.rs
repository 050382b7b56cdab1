//! Job and queue definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// The three write-down queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Insert an accepted bid into the append-only log
    PersistBid,
    /// Mirror hot-store auction fields onto the cold row
    UpdateAuctionMirror,
    /// Run the finalization settlement routine
    FinalizeAuction,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::PersistBid => "persist-bid",
            Queue::UpdateAuctionMirror => "update-auction-mirror",
            Queue::FinalizeAuction => "finalize-auction",
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of deferred work
///
/// The key is a natural identifier (`bid-{auction}-{bidder}-{micros}`,
/// `finalize-{auction}`) so a redelivered submission coalesces with the
/// pending one instead of running twice.
#[derive(Debug, Clone)]
pub struct Job {
    pub queue: Queue,
    pub key: String,
    pub payload: serde_json::Value,
    /// 1-based execution attempt
    pub attempt: u32,
    pub run_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

/// Handler outcome classification
#[derive(Debug, Error)]
pub enum JobError {
    /// Infrastructure hiccup; retried with backoff
    #[error("transient job failure: {0}")]
    Transient(String),

    /// The job can never succeed; recorded as dead
    #[error("permanent job failure: {0}")]
    Permanent(String),

    /// Not due yet: run again at the given time without burning the
    /// backoff schedule (a finalize trigger that fired before an
    /// extension moved the end time)
    #[error("job not due until {0}")]
    RetryAt(DateTime<Utc>),
}

/// Executes jobs popped by the runner
///
/// Handlers must be idempotent: every queue is at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}
