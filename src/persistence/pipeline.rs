//! Batch, flush and commit machinery
//!
//! Deliveries accumulate in a pending list; every batch interval the list is
//! flushed as one idempotent bulk upsert and the highest offset seen per
//! partition is committed, plus one.
//!
//! The commit policy is deliberately loose: if a batch carried offsets 10..20
//! and 15 failed while others landed, the commit still moves to 21 and 15 is
//! not redelivered. Bulk-write failures are rare enough that external
//! reconciliation covers the gap, and the highest-offset map keeps commits
//! O(partitions). A batch is only retained for retry when *nothing* in it
//! landed or the commit itself failed.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::{BusConsumer, Delivery};
use crate::messages::TradeMessage;
use crate::models::Trade;
use crate::store::TradeStore;

pub struct PersistencePipeline<S, C> {
    store: Arc<S>,
    consumer: Arc<C>,
    pending: Vec<Trade>,
    highest_offset: FxHashMap<i32, i64>,
}

/// What one flush did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub upserted: u64,
    pub matched: u64,
    pub failed: u64,
    pub committed: bool,
}

impl<S: TradeStore, C: BusConsumer> PersistencePipeline<S, C> {
    pub fn new(store: Arc<S>, consumer: Arc<C>) -> Self {
        Self {
            store,
            consumer,
            pending: Vec::new(),
            highest_offset: FxHashMap::default(),
        }
    }

    /// Parse one delivery into the pending batch. Malformed payloads are
    /// dropped but still raise the partition watermark, so the next commit
    /// moves past them.
    pub fn handle_delivery(&mut self, delivery: &Delivery) {
        let highest = self
            .highest_offset
            .entry(delivery.partition)
            .or_insert(delivery.offset);
        *highest = (*highest).max(delivery.offset);

        match TradeMessage::parse(&delivery.payload) {
            Ok(msg) => self
                .pending
                .push(msg.into_trade(delivery.partition, delivery.offset)),
            Err(err) => warn!(
                "[DLQ] dropping trade message partition={} offset={}: {err}",
                delivery.partition, delivery.offset
            ),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Write the pending batch and commit offsets.
    ///
    /// - any successful document (inserted or already present) permits the
    ///   commit of `highest_seen + 1` on every partition;
    /// - a batch where nothing landed, a store error, or a failed commit
    ///   puts the batch back at the front of pending for the next tick.
    pub async fn flush(&mut self) -> FlushReport {
        if self.pending.is_empty() {
            return FlushReport::default();
        }

        let to_flush = std::mem::take(&mut self.pending);
        let offsets: Vec<(i32, i64)> = self
            .highest_offset
            .iter()
            .map(|(p, o)| (*p, *o))
            .collect();

        let mut report = FlushReport {
            attempted: to_flush.len(),
            ..FlushReport::default()
        };

        let outcome = match self.store.upsert_trades(&to_flush).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("trade batch write failed: {err}; retaining batch for retry");
                self.restore(to_flush);
                return report;
            }
        };

        report.upserted = outcome.upserted;
        report.matched = outcome.matched;
        report.failed = outcome.failed;

        if outcome.successful() == 0 {
            warn!(
                "no trade in batch of {} was written; retaining batch for retry",
                report.attempted
            );
            self.restore(to_flush);
            return report;
        }

        if outcome.failed > 0 {
            warn!(
                "partial batch failure: {} of {} trades not written; committing past them",
                outcome.failed, report.attempted
            );
        }

        for (partition, highest) in offsets {
            if let Err(err) = self.consumer.commit(partition, highest + 1).await {
                warn!(
                    "offset commit failed on partition {partition}: {err}; retaining batch for retry"
                );
                self.restore(to_flush);
                return report;
            }
        }

        report.committed = true;
        info!(
            "flushed {} trades (upserted={} matched={} failed={})",
            report.attempted, report.upserted, report.matched, report.failed
        );
        report
    }

    /// Put a failed batch back in front of whatever arrived meanwhile.
    fn restore(&mut self, mut to_flush: Vec<Trade>) {
        to_flush.append(&mut self.pending);
        self.pending = to_flush;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, InMemoryBus, TRADES_TOPIC, TRADE_PERSISTENCE_GROUP};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn delivery(partition: i32, offset: i64, volume: &str, time: &str) -> Delivery {
        Delivery {
            partition,
            offset,
            payload: format!(
                r#"{{"messageType":"trades","tradeType":"BUY","volume":"{volume}","time":"{time}"}}"#
            )
            .into_bytes(),
        }
    }

    fn harness() -> (Arc<MemoryStore>, Arc<crate::bus::log::LogConsumer>, InMemoryBus) {
        let bus = InMemoryBus::new();
        bus.create_topic(TRADES_TOPIC, 3);
        let consumer = Arc::new(bus.subscribe(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP));
        (Arc::new(MemoryStore::new()), consumer, bus)
    }

    #[tokio::test]
    async fn test_flush_writes_batch_and_commits_highest_plus_one() {
        let (store, consumer, bus) = harness();
        let mut pipeline = PersistencePipeline::new(Arc::clone(&store), consumer);

        pipeline.handle_delivery(&delivery(0, 10, "1", "2024-03-01T12:00:00Z"));
        pipeline.handle_delivery(&delivery(0, 12, "2", "2024-03-01T12:00:01Z"));
        pipeline.handle_delivery(&delivery(1, 4, "3", "2024-03-01T12:00:02Z"));

        let report = pipeline.flush().await;

        assert!(report.committed);
        assert_eq!(report.upserted, 3);
        assert_eq!(store.trade_count(), 3);
        assert_eq!(pipeline.pending_len(), 0);
        assert_eq!(
            bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0),
            Some(13)
        );
        assert_eq!(
            bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 1),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_empty_flush_is_a_no_op() {
        let (store, consumer, bus) = harness();
        let mut pipeline = PersistencePipeline::new(store, consumer);

        let report = pipeline.flush().await;

        assert_eq!(report, FlushReport::default());
        assert_eq!(bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0), None);
    }

    #[tokio::test]
    async fn test_malformed_delivery_is_dropped_not_buffered() {
        let (store, consumer, _bus) = harness();
        let mut pipeline = PersistencePipeline::new(store, consumer);

        pipeline.handle_delivery(&Delivery {
            partition: 0,
            offset: 1,
            payload: b"not json".to_vec(),
        });

        assert_eq!(pipeline.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_batch_is_idempotent() {
        let (store, consumer, _bus) = harness();
        let mut pipeline = PersistencePipeline::new(Arc::clone(&store), consumer);

        pipeline.handle_delivery(&delivery(0, 10, "1", "2024-03-01T12:00:00Z"));
        pipeline.flush().await;

        // Same delivery again, as after a rebalance.
        pipeline.handle_delivery(&delivery(0, 10, "1", "2024-03-01T12:00:00Z"));
        let report = pipeline.flush().await;

        assert!(report.committed);
        assert_eq!(report.matched, 1);
        assert_eq!(store.trade_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_with_successes_still_commits() {
        let (store, consumer, bus) = harness();
        store.poison_trade(0, 15);
        let mut pipeline = PersistencePipeline::new(Arc::clone(&store), consumer);

        pipeline.handle_delivery(&delivery(0, 14, "1", "2024-03-01T12:00:00Z"));
        pipeline.handle_delivery(&delivery(0, 15, "2", "2024-03-01T12:00:01Z"));
        pipeline.handle_delivery(&delivery(0, 16, "3", "2024-03-01T12:00:02Z"));

        let report = pipeline.flush().await;

        assert!(report.committed);
        assert_eq!(report.failed, 1);
        // The loose policy: the commit passes the failed offset.
        assert_eq!(
            bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0),
            Some(17)
        );
        assert_eq!(store.trade_count(), 2);
        assert_eq!(pipeline.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_total_failure_restores_batch_and_skips_commit() {
        let (store, consumer, bus) = harness();
        store.poison_trade(0, 10);
        let mut pipeline = PersistencePipeline::new(Arc::clone(&store), consumer);

        pipeline.handle_delivery(&delivery(0, 10, "1", "2024-03-01T12:00:00Z"));
        let report = pipeline.flush().await;

        assert!(!report.committed);
        assert_eq!(pipeline.pending_len(), 1);
        assert_eq!(bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0), None);
        assert_eq!(store.trade_count(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_restores_batch_in_arrival_order() {
        let (store, consumer, bus) = harness();
        store.set_unavailable(true);
        let mut pipeline = PersistencePipeline::new(Arc::clone(&store), consumer);

        pipeline.handle_delivery(&delivery(0, 1, "1", "2024-03-01T12:00:00Z"));
        pipeline.flush().await;
        // A newer delivery lands while the store is down.
        pipeline.handle_delivery(&delivery(0, 2, "2", "2024-03-01T12:00:01Z"));

        assert_eq!(pipeline.pending_len(), 2);
        assert_eq!(bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0), None);

        // Outage over: one flush lands both, oldest first.
        store.set_unavailable(false);
        let report = pipeline.flush().await;

        assert!(report.committed);
        assert_eq!(store.trade_count(), 2);
        assert_eq!(
            bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0),
            Some(3)
        );
    }

    /// Consumer whose commits can be switched off.
    struct FlakyCommit<C> {
        inner: Arc<C>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl<C: BusConsumer> BusConsumer for FlakyCommit<C> {
        async fn next(&self) -> Result<Delivery, BusError> {
            self.inner.next().await
        }

        async fn commit(&self, partition: i32, next_offset: i64) -> Result<(), BusError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BusError::Unavailable("commit refused".into()));
            }
            self.inner.commit(partition, next_offset).await
        }
    }

    #[tokio::test]
    async fn test_commit_failure_retains_batch_for_retry() {
        let (store, consumer, bus) = harness();
        let flaky = Arc::new(FlakyCommit {
            inner: consumer,
            fail: AtomicBool::new(true),
        });
        let mut pipeline = PersistencePipeline::new(Arc::clone(&store), Arc::clone(&flaky));

        pipeline.handle_delivery(&delivery(0, 7, "1", "2024-03-01T12:00:00Z"));
        let report = pipeline.flush().await;

        assert!(!report.committed);
        assert_eq!(report.upserted, 1);
        assert_eq!(pipeline.pending_len(), 1);
        assert_eq!(bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0), None);

        // Next tick: the write is a matched duplicate, the commit lands.
        flaky.fail.store(false, Ordering::SeqCst);
        let report = pipeline.flush().await;

        assert!(report.committed);
        assert_eq!(report.matched, 1);
        assert_eq!(
            bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0),
            Some(8)
        );
    }
}
