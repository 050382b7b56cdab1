//! Broadcast-backed bus implementation
//!
//! One broadcast channel carries every topic; subscribers filter by
//! event type. Slow subscribers lag instead of blocking the publisher,
//! and a lagged subscriber simply resumes from the oldest retained
//! event; consumers already treat delivery as at-least-once.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use types::prelude::AuctionEvent;

/// Default channel capacity before slow subscribers start lagging
const DEFAULT_CAPACITY: usize = 1024;

/// Process-wide event bus
///
/// Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct FanoutBus {
    tx: broadcast::Sender<AuctionEvent>,
    published: std::sync::Arc<AtomicU64>,
}

impl FanoutBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            published: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Publish a committed event to every live subscriber
    ///
    /// Returns the number of subscribers that received it. Zero
    /// subscribers is not an error: the event is an optimisation, the
    /// hot store already holds the truth.
    pub fn publish(&self, event: AuctionEvent) -> usize {
        let topic = event.topic();
        let auction_id = event.auction_id();
        let receivers = self.tx.send(event).unwrap_or(0);
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(%auction_id, topic, receivers, "event published");
        receivers
    }

    /// Open a new FIFO subscription
    pub fn subscribe(&self) -> BusSubscriber {
        BusSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// Total events published on this bus
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FanoutBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// One subscriber's FIFO stream
pub struct BusSubscriber {
    rx: broadcast::Receiver<AuctionEvent>,
}

impl BusSubscriber {
    /// Receive the next event, skipping over any lag gap
    ///
    /// Returns `None` once the bus is gone (shutdown).
    pub async fn recv(&mut self) -> Option<AuctionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "bus subscriber lagged; resuming");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive (test helper)
    pub fn try_recv(&mut self) -> Option<AuctionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
