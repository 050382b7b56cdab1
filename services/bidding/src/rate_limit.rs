//! Per-bidder rate gate
//!
//! A put-if-absent token with a short TTL: one token per bidder, taken
//! before the hot store is touched. A bidder holding a live token is
//! rejected outright, so a flood of requests from one account never
//! serializes behind the auction's record guard.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use types::prelude::UserId;

/// One-bid-per-interval gate keyed by bidder
pub struct RateGate {
    tokens: DashMap<UserId, Instant>,
    ttl: Duration,
}

impl RateGate {
    /// Gate allowing `per_sec` bids per bidder per second
    pub fn new(per_sec: u32) -> Self {
        let per_sec = per_sec.max(1);
        Self {
            tokens: DashMap::new(),
            ttl: Duration::from_millis(1000 / per_sec as u64),
        }
    }

    /// Try to take the token for a bidder
    ///
    /// Returns `false` while the previous token is still live.
    pub fn try_acquire(&self, bidder_id: UserId) -> bool {
        let now = Instant::now();
        match self.tokens.entry(bidder_id) {
            Entry::Occupied(mut entry) => {
                if now < *entry.get() {
                    false
                } else {
                    entry.insert(now + self.ttl);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + self.ttl);
                true
            }
        }
    }

    /// Drop expired tokens (the map otherwise grows with bidder count)
    pub fn prune(&self) {
        let now = Instant::now();
        self.tokens.retain(|_, expires_at| now < *expires_at);
    }

    /// Number of live tokens (diagnostics)
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
