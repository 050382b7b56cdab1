//! Active-auctions index
//!
//! Ordered set of live auctions keyed by end time, used to find auctions
//! closing within a horizon and to drive the expiry sweep. The index is
//! advisory: the record itself stays authoritative for `end_time`.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Mutex;
use types::prelude::AuctionId;

/// End-time-ordered index of active auctions
///
/// Uses a BTreeSet for deterministic iteration in end-time order. The
/// mutex is never held across an await point.
#[derive(Debug, Default)]
pub struct ActiveIndex {
    entries: Mutex<BTreeSet<(DateTime<Utc>, AuctionId)>>,
}

impl ActiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an auction at its end time
    pub fn insert(&self, end_time: DateTime<Utc>, auction_id: AuctionId) {
        let mut entries = self.entries.lock().expect("index poisoned");
        entries.insert((end_time, auction_id));
    }

    /// Remove an auction (end time must match the indexed entry)
    pub fn remove(&self, end_time: DateTime<Utc>, auction_id: AuctionId) -> bool {
        let mut entries = self.entries.lock().expect("index poisoned");
        entries.remove(&(end_time, auction_id))
    }

    /// Move an auction to a new end time after an extension
    pub fn reposition(
        &self,
        old_end_time: DateTime<Utc>,
        new_end_time: DateTime<Utc>,
        auction_id: AuctionId,
    ) {
        let mut entries = self.entries.lock().expect("index poisoned");
        entries.remove(&(old_end_time, auction_id));
        entries.insert((new_end_time, auction_id));
    }

    /// Auctions ending within `horizon` of `now`, soonest first
    pub fn ending_within(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> Vec<(AuctionId, DateTime<Utc>)> {
        let entries = self.entries.lock().expect("index poisoned");
        entries
            .iter()
            .take_while(|(end, _)| *end <= now + horizon)
            .map(|(end, id)| (*id, *end))
            .collect()
    }

    /// Number of indexed auctions
    pub fn len(&self) -> usize {
        self.entries.lock().expect("index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an exact entry is present (test/diagnostic helper)
    pub fn contains(&self, end_time: DateTime<Utc>, auction_id: AuctionId) -> bool {
        let entries = self.entries.lock().expect("index poisoned");
        entries.contains(&(end_time, auction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_insert_and_remove() {
        let index = ActiveIndex::new();
        let id = AuctionId::new();

        index.insert(at(1000), id);
        assert_eq!(index.len(), 1);
        assert!(index.contains(at(1000), id));

        assert!(index.remove(at(1000), id));
        assert!(index.is_empty());
    }

    #[test]
    fn test_ending_within_orders_by_end_time() {
        let index = ActiveIndex::new();
        let a = AuctionId::new();
        let b = AuctionId::new();
        let c = AuctionId::new();

        index.insert(at(3000), c);
        index.insert(at(1000), a);
        index.insert(at(2000), b);

        let due = index.ending_within(at(900), Duration::seconds(1200));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0], (a, at(1000)));
        assert_eq!(due[1], (b, at(2000)));
    }

    #[test]
    fn test_reposition_moves_entry() {
        let index = ActiveIndex::new();
        let id = AuctionId::new();

        index.insert(at(1000), id);
        index.reposition(at(1000), at(1030), id);

        assert!(!index.contains(at(1000), id));
        assert!(index.contains(at(1030), id));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_with_wrong_end_time_is_noop() {
        let index = ActiveIndex::new();
        let id = AuctionId::new();

        index.insert(at(1000), id);
        assert!(!index.remove(at(1030), id));
        assert_eq!(index.len(), 1);
    }
}
