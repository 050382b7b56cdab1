//! Anti-snipe extension policy
//!
//! A bid that lands with at most `threshold` seconds on the clock pushes
//! the end time out by `duration`. Consecutive late bids keep extending
//! without bound; the auction cannot be won by
//! timing the last packet.

use chrono::{DateTime, Duration, Utc};
use hot_state::{ExtendOutcome, HotStore};
use tracing::debug;
use types::prelude::*;

/// Threshold/duration pair, both configurable
#[derive(Debug, Clone, Copy)]
pub struct ExtensionPolicy {
    pub threshold: Duration,
    pub duration: Duration,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::seconds(30),
            duration: Duration::seconds(30),
        }
    }
}

impl ExtensionPolicy {
    pub fn new(threshold_secs: i64, duration_secs: i64) -> Self {
        Self {
            threshold: Duration::seconds(threshold_secs),
            duration: Duration::seconds(duration_secs),
        }
    }

    /// Evaluate the policy after an accepted bid
    ///
    /// Returns extension data when the end time moved. Store-level
    /// errors are swallowed: the bid already committed, and a rejection
    /// here just means the auction ended or vanished in the meantime.
    pub fn apply(
        &self,
        store: &HotStore,
        auction_id: AuctionId,
        server_time: DateTime<Utc>,
    ) -> Option<ExtensionInfo> {
        match store.extend(auction_id, server_time, self.threshold, self.duration) {
            Ok(ExtendOutcome::Extended {
                old_end_time,
                new_end_time,
                extended_by_secs,
            }) => Some(ExtensionInfo {
                old_end_time,
                new_end_time,
                extended_by_secs,
            }),
            Ok(ExtendOutcome::NotExtended { .. }) => None,
            Err(err) => {
                debug!(auction_id = %auction_id, %err, "extension skipped");
                None
            }
        }
    }
}
