//! Market interval processing
//!
//! The bus loop never blocks: each delivery claims its offset with the
//! partition tracker and fans out into a task. The task walks the
//! idempotency ladder (recent set, then store), fetches the interval's
//! trades through the range-query RPC with backoff, computes the PnL and
//! writes the market+PnL pair atomically. Its epilogue feeds the tracker
//! and drives as many in-order commits as the completed prefix allows.
//!
//! A processing failure leaves the offset unclaimed; the message returns
//! via redelivery after a rebalance or restart. A commit failure stops the
//! walk and is retried on the next completion.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::recent::RecentIntervals;
use super::tracker::PartitionTracker;
use crate::bus::{BusConsumer, Delivery};
use crate::messages::MarketMessage;
use crate::models::MarketInterval;
use crate::pnl::compute_pnl;
use crate::retry::{Backoff, retry};
use crate::rpc::{RpcError, TradesProvider};
use crate::store::{MarketStore, StoreError, WriteOutcome};

#[derive(Error, Debug)]
pub enum CalcError {
    #[error("trade fetch failed: {0}")]
    Trades(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whether an interval was computed here or already durably processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    Skipped,
}

struct CalcState {
    trackers: FxHashMap<i32, PartitionTracker>,
    recent: RecentIntervals,
}

pub struct CalculationPipeline<C, S, T> {
    consumer: Arc<C>,
    store: Arc<S>,
    trades: Arc<T>,
    fee: Decimal,
    backoff: Backoff,
    state: Arc<Mutex<CalcState>>,
}

impl<C, S, T> Clone for CalculationPipeline<C, S, T> {
    fn clone(&self) -> Self {
        Self {
            consumer: Arc::clone(&self.consumer),
            store: Arc::clone(&self.store),
            trades: Arc::clone(&self.trades),
            fee: self.fee,
            backoff: self.backoff,
            state: Arc::clone(&self.state),
        }
    }
}

impl<C, S, T> CalculationPipeline<C, S, T>
where
    C: BusConsumer,
    S: MarketStore,
    T: TradesProvider,
{
    pub fn new(
        consumer: Arc<C>,
        store: Arc<S>,
        trades: Arc<T>,
        fee: Decimal,
        market_buffer_size: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            consumer,
            store,
            trades,
            fee,
            backoff,
            state: Arc::new(Mutex::new(CalcState {
                trackers: FxHashMap::default(),
                recent: RecentIntervals::new(market_buffer_size),
            })),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("calculation pipeline started");
        loop {
            tokio::select! {
                delivery = self.consumer.next() => match delivery {
                    Ok(delivery) => self.handle_delivery(delivery).await,
                    Err(err) => {
                        warn!("market consumer error: {err}");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("calculation pipeline stopped");
    }

    /// Claim the delivery's offset and fan processing out into a task.
    /// Never blocks on the interval itself.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let market = match MarketMessage::parse(&delivery.payload) {
            Ok(msg) => msg.into_interval(delivery.partition, delivery.offset),
            Err(err) => {
                warn!(
                    "[DLQ] dropping market message partition={} offset={}: {err}",
                    delivery.partition, delivery.offset
                );
                // A malformed offset has nothing to process; complete it
                // immediately so the ordered commit chain moves past it.
                let mut state = self.state.lock().await;
                {
                    let tracker = state.trackers.entry(delivery.partition).or_default();
                    if tracker.begin(delivery.offset) {
                        tracker.complete(delivery.offset);
                    }
                }
                self.commit_ready(&mut state, delivery.partition).await;
                return;
            }
        };

        {
            let mut state = self.state.lock().await;
            let tracker = state.trackers.entry(market.partition).or_default();
            if !tracker.begin(market.offset) {
                debug!(
                    "duplicate market delivery partition={} offset={} skipped",
                    market.partition, market.offset
                );
                return;
            }
        }

        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run_interval(market).await;
        });
    }

    async fn run_interval(&self, market: MarketInterval) {
        let (partition, offset) = (market.partition, market.offset);
        match self.process_market(&market).await {
            Ok(outcome) => {
                match outcome {
                    ProcessOutcome::Processed => info!(
                        "pnl written for interval [{}, {}] (partition={} offset={})",
                        market.start_time, market.end_time, partition, offset
                    ),
                    ProcessOutcome::Skipped => info!(
                        "interval [{}, {}] already processed, skipping (partition={} offset={})",
                        market.start_time, market.end_time, partition, offset
                    ),
                }
                let mut state = self.state.lock().await;
                if let Some(tracker) = state.trackers.get_mut(&partition) {
                    tracker.complete(offset);
                }
                self.commit_ready(&mut state, partition).await;
            }
            Err(err) => {
                warn!(
                    "interval processing failed (partition={} offset={}): {err}; awaiting redelivery",
                    partition, offset
                );
                let mut state = self.state.lock().await;
                if let Some(tracker) = state.trackers.get_mut(&partition) {
                    tracker.abandon(offset);
                }
            }
        }
    }

    /// Compute and persist one interval. Safe to call again for the same
    /// interval: every rung reports it as already processed.
    pub async fn process_market(
        &self,
        market: &MarketInterval,
    ) -> Result<ProcessOutcome, CalcError> {
        let key = market.interval_key();

        if self.state.lock().await.recent.contains(&key) {
            return Ok(ProcessOutcome::Skipped);
        }

        if self
            .store
            .interval_exists(market.start_time, market.end_time)
            .await?
        {
            self.state.lock().await.recent.insert(key);
            return Ok(ProcessOutcome::Skipped);
        }

        let fills = retry(self.backoff, "trade range fetch", || {
            self.trades
                .trades_for_period(market.start_time, market.end_time)
        })
        .await?;

        let pnl = compute_pnl(market, &fills, self.fee);
        let outcome = match self.store.insert_market_with_pnl(market, &pnl).await? {
            WriteOutcome::Written => ProcessOutcome::Processed,
            // A concurrent writer won the race; that is success too.
            WriteOutcome::AlreadyExists => ProcessOutcome::Skipped,
        };

        self.state.lock().await.recent.insert(key);
        Ok(outcome)
    }

    /// Send every commit the completed prefix allows, in order.
    async fn commit_ready(&self, state: &mut CalcState, partition: i32) {
        let Some(tracker) = state.trackers.get_mut(&partition) else {
            return;
        };
        while let Some(next) = tracker.next_committable() {
            match self.consumer.commit(partition, next + 1).await {
                Ok(()) => tracker.mark_committed(next),
                Err(err) => {
                    warn!(
                        "offset commit failed on partition {partition}: {err}; will retry on next completion"
                    );
                    break;
                }
            }
        }
    }
}
