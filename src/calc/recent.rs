//! Bounded set of recently processed intervals
//!
//! First line of the idempotency check: redelivered intervals are usually
//! recent, so a small FIFO set answers most duplicates without a store
//! round-trip. Owned by the pipeline and passed where needed; the store
//! remains the authority for anything that has aged out.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

pub type IntervalKey = (DateTime<Utc>, DateTime<Utc>);

pub struct RecentIntervals {
    capacity: usize,
    order: VecDeque<IntervalKey>,
    seen: HashSet<IntervalKey>,
}

impl RecentIntervals {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, key: &IntervalKey) -> bool {
        self.seen.contains(key)
    }

    /// Record a processed interval, evicting the oldest entry when full.
    pub fn insert(&mut self, key: IntervalKey) {
        if !self.seen.insert(key) {
            return;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: i64) -> IntervalKey {
        let start = DateTime::from_timestamp(n * 60, 0).unwrap();
        (start, start + chrono::Duration::seconds(60))
    }

    #[test]
    fn test_remembers_inserted_intervals() {
        let mut recent = RecentIntervals::new(10);
        recent.insert(key(1));

        assert!(recent.contains(&key(1)));
        assert!(!recent.contains(&key(2)));
    }

    #[test]
    fn test_evicts_oldest_first_when_full() {
        let mut recent = RecentIntervals::new(3);
        for n in 1..=4 {
            recent.insert(key(n));
        }

        assert!(!recent.contains(&key(1)));
        assert!(recent.contains(&key(2)));
        assert!(recent.contains(&key(4)));
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let mut recent = RecentIntervals::new(3);
        recent.insert(key(1));
        recent.insert(key(1));

        assert_eq!(recent.len(), 1);
    }
}
