//! Bounded-retention trade buffer
//!
//! Inserts dominate and trades arrive roughly chronologically per partition,
//! so an append-ordered deque is enough: retention sweeps pop from the front
//! while the head is older than the cutoff.
//!
//! The buffer also tracks one merged *queried range*. Once a span has been
//! answered, any trade landing inside it arrived too late to have been part
//! of that answer; such trades are flagged (and logged) but kept.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::warn;

use crate::models::Trade;

pub struct TradeMemory {
    trades: VecDeque<Trade>,
    last_trade_time: Option<DateTime<Utc>>,
    /// Merged `[start, end]` span of every answered range query.
    queried: Option<(DateTime<Utc>, DateTime<Utc>)>,
    retention: Duration,
    queried_retention: Duration,
}

impl TradeMemory {
    pub fn new(retention: std::time::Duration, queried_retention: std::time::Duration) -> Self {
        Self {
            trades: VecDeque::new(),
            last_trade_time: None,
            queried: None,
            retention: Duration::from_std(retention).unwrap_or(Duration::MAX),
            queried_retention: Duration::from_std(queried_retention).unwrap_or(Duration::MAX),
        }
    }

    /// Append a trade and advance `last_trade_time`.
    pub fn add(&mut self, trade: Trade) {
        if self.is_possible_late_arrival(trade.time) {
            warn!(
                "late trade inside already-queried range: time={} partition={} offset={}",
                trade.time, trade.partition, trade.offset
            );
        }

        self.last_trade_time = Some(match self.last_trade_time {
            Some(last) => last.max(trade.time),
            None => trade.time,
        });
        self.trades.push_back(trade);
    }

    /// All buffered trades with `start <= time <= end`, both ends inclusive.
    pub fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|t| t.time >= start && t.time <= end)
            .cloned()
            .collect()
    }

    pub fn has_any(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.trades
            .iter()
            .any(|t| t.time >= start && t.time <= end)
    }

    /// Timestamp of the newest trade ever added; monotonically non-decreasing.
    pub fn last_trade_time(&self) -> Option<DateTime<Utc>> {
        self.last_trade_time
    }

    /// Merge `[start, end]` into the queried range. The upper bound only
    /// grows; the lower bound extends backward only within the retention
    /// window and is advanced forward to `now - queried_retention`.
    pub fn update_queried_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let floor = now - self.queried_retention;
        self.queried = Some(match self.queried {
            None => (start.max(floor), end),
            Some((q_start, q_end)) => (q_start.min(start).max(floor), q_end.max(end)),
        });
    }

    /// Whether a trade at `time` would land inside the already-queried span.
    pub fn is_possible_late_arrival(&self, time: DateTime<Utc>) -> bool {
        match self.queried {
            Some((start, end)) => time >= start && time <= end,
            None => false,
        }
    }

    /// Drop trades older than `now - retention`; a trade exactly at the
    /// cutoff stays. Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed = 0;
        while let Some(front) = self.trades.front() {
            if front.time < cutoff {
                self.trades.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal::Decimal;
    use std::time::Duration as StdDuration;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn trade(offset: i64, time: &str) -> Trade {
        Trade::new(Side::Buy, Decimal::ONE, ts(time), 0, offset)
    }

    fn memory() -> TradeMemory {
        TradeMemory::new(StdDuration::from_secs(10), StdDuration::from_secs(60))
    }

    #[test]
    fn test_query_is_inclusive_on_both_ends() {
        let mut mem = memory();
        mem.add(trade(1, "2024-03-01T12:00:00Z"));
        mem.add(trade(2, "2024-03-01T12:00:30Z"));
        mem.add(trade(3, "2024-03-01T12:01:00Z"));
        mem.add(trade(4, "2024-03-01T12:01:01Z"));

        let hits = mem.query(ts("2024-03-01T12:00:00Z"), ts("2024-03-01T12:01:00Z"));
        let offsets: Vec<i64> = hits.iter().map(|t| t.offset).collect();

        assert_eq!(offsets, vec![1, 2, 3]);
        assert!(mem.has_any(ts("2024-03-01T12:00:00Z"), ts("2024-03-01T12:00:00Z")));
        assert!(!mem.has_any(ts("2024-03-01T12:02:00Z"), ts("2024-03-01T12:03:00Z")));
    }

    #[test]
    fn test_sweep_keeps_trade_exactly_at_cutoff() {
        let mut mem = memory();
        mem.add(trade(1, "2024-03-01T12:00:00Z"));
        mem.add(trade(2, "2024-03-01T12:00:05Z"));
        mem.add(trade(3, "2024-03-01T12:00:09Z"));

        // Cutoff is 12:00:05; offset 1 is older, offset 2 sits exactly on it.
        let removed = mem.sweep(ts("2024-03-01T12:00:15Z"));

        assert_eq!(removed, 1);
        let offsets: Vec<i64> = mem
            .query(ts("2024-03-01T12:00:00Z"), ts("2024-03-01T12:01:00Z"))
            .iter()
            .map(|t| t.offset)
            .collect();
        assert_eq!(offsets, vec![2, 3]);
    }

    #[test]
    fn test_last_trade_time_never_decreases() {
        let mut mem = memory();
        mem.add(trade(1, "2024-03-01T12:00:10Z"));
        mem.add(trade(2, "2024-03-01T12:00:05Z"));

        assert_eq!(mem.last_trade_time(), Some(ts("2024-03-01T12:00:10Z")));
    }

    #[test]
    fn test_queried_range_merges_and_clamps() {
        let mut mem = memory();
        let now = ts("2024-03-01T12:10:00Z");

        mem.update_queried_range(ts("2024-03-01T12:09:10Z"), ts("2024-03-01T12:09:30Z"), now);
        assert!(!mem.is_possible_late_arrival(ts("2024-03-01T12:09:05Z")));

        // Upper bound grows; backward extension inside the 60 s window is kept.
        mem.update_queried_range(ts("2024-03-01T12:09:05Z"), ts("2024-03-01T12:09:45Z"), now);
        assert!(mem.is_possible_late_arrival(ts("2024-03-01T12:09:05Z")));
        assert!(mem.is_possible_late_arrival(ts("2024-03-01T12:09:45Z")));

        // A start older than the window is clamped to now - 60 s.
        mem.update_queried_range(ts("2024-03-01T12:00:00Z"), ts("2024-03-01T12:09:50Z"), now);
        assert!(!mem.is_possible_late_arrival(ts("2024-03-01T12:08:59Z")));
        assert!(mem.is_possible_late_arrival(ts("2024-03-01T12:09:00Z")));
    }

    #[test]
    fn test_queried_range_start_advances_with_now() {
        let mut mem = memory();
        mem.update_queried_range(
            ts("2024-03-01T12:09:00Z"),
            ts("2024-03-01T12:09:30Z"),
            ts("2024-03-01T12:09:30Z"),
        );
        assert!(mem.is_possible_late_arrival(ts("2024-03-01T12:09:00Z")));

        // Two minutes later the same merge advances the floor past the old start.
        mem.update_queried_range(
            ts("2024-03-01T12:11:00Z"),
            ts("2024-03-01T12:11:30Z"),
            ts("2024-03-01T12:11:30Z"),
        );
        assert!(!mem.is_possible_late_arrival(ts("2024-03-01T12:09:00Z")));
        assert!(mem.is_possible_late_arrival(ts("2024-03-01T12:10:30Z")));
    }

    #[test]
    fn test_no_late_flag_without_queried_range() {
        let mem = memory();
        assert!(!mem.is_possible_late_arrival(ts("2024-03-01T12:00:00Z")));
    }

    #[test]
    fn test_out_of_range_query_is_empty() {
        let mut mem = memory();
        mem.add(trade(1, "2024-03-01T12:00:00Z"));
        assert!(mem
            .query(ts("2024-03-01T13:00:00Z"), ts("2024-03-01T14:00:00Z"))
            .is_empty());
    }
}
