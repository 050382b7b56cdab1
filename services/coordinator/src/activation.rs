//! Scheduled-auction activation
//!
//! Auctions created with a future start time sit in `scheduled` until
//! this loop flips them. The UPDATE is the race arbiter across
//! instances: each due row is returned to exactly one sweep, which then
//! hydrates it and arms its finalization timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cold_store::ColdStore;
use hot_state::HotStore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::scheduler::FinalizationScheduler;

/// Spawn the activation loop
pub fn spawn_activation_loop(
    cold: ColdStore,
    hot: Arc<HotStore>,
    scheduler: Arc<FinalizationScheduler>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match cold.activate_due_auctions(Utc::now()).await {
                Ok(rows) => {
                    for row in rows {
                        match row.into_live() {
                            Ok(live) => {
                                let auction_id = live.id;
                                let end_time = live.end_time;
                                hot.install(live);
                                scheduler.schedule(auction_id, end_time);
                                info!(auction_id = %auction_id, "scheduled auction went live");
                            }
                            Err(err) => error!(%err, "activated row failed to load"),
                        }
                    }
                }
                Err(err) => error!(%err, "activation sweep failed"),
            }
        }
    })
}
