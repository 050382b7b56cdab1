//! Expiry sweeper
//!
//! Ticks once a second, firing end-of-life notifications and evicting
//! records past their retention window. The sweep itself lives on the
//! store; this task only drives it on the wall clock.

use crate::store::HotStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn the sweep loop
pub fn spawn(store: Arc<HotStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let (fired, evicted) = store.sweep(Utc::now());
            if fired > 0 || evicted > 0 {
                debug!(fired, evicted, "hot store sweep");
            }
        }
    })
}
