//! Persistence service wiring
//!
//! Runs the consume loop and the batch timer over one pipeline, and exposes
//! the store-backed side of the trades RPC. On shutdown the timer stops and
//! one final flush drains whatever is pending before the process exits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use super::pipeline::PersistencePipeline;
use crate::bus::BusConsumer;
use crate::models::TradeFill;
use crate::rpc::{RpcError, TradesProvider};
use crate::store::TradeStore;

pub struct TradePersistenceService<S, C> {
    consumer: Arc<C>,
    pipeline: PersistencePipeline<S, C>,
    batch_interval: Duration,
}

impl<S: TradeStore, C: BusConsumer> TradePersistenceService<S, C> {
    pub fn new(store: Arc<S>, consumer: Arc<C>, batch_interval: Duration) -> Self {
        Self {
            pipeline: PersistencePipeline::new(store, Arc::clone(&consumer)),
            consumer,
            batch_interval,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "trade persistence service started (batch interval {:?})",
            self.batch_interval
        );
        let mut ticker = interval(self.batch_interval);

        loop {
            tokio::select! {
                delivery = self.consumer.next() => match delivery {
                    Ok(delivery) => self.pipeline.handle_delivery(&delivery),
                    Err(err) => {
                        warn!("trade persistence consumer error: {err}");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.pipeline.flush().await;
                }
                _ = shutdown.changed() => {
                    let pending = self.pipeline.pending_len();
                    if pending > 0 {
                        info!("draining {pending} pending trades before shutdown");
                    }
                    self.pipeline.flush().await;
                    break;
                }
            }
        }
        info!("trade persistence service stopped");
    }
}

/// Store-backed trades RPC: history beyond the memory buffer's window.
pub struct StoredTrades<S> {
    store: Arc<S>,
}

impl<S> StoredTrades<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: TradeStore> TradesProvider for StoredTrades<S> {
    async fn trades_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, RpcError> {
        let trades = self
            .store
            .trades_in_range(start, end)
            .await
            .map_err(|err| RpcError::Internal(err.to_string()))?;
        Ok(trades.iter().map(TradeFill::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusPublisher, InMemoryBus, TRADES_TOPIC, TRADE_PERSISTENCE_GROUP};
    use crate::models::{Side, Trade};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    #[tokio::test(start_paused = true)]
    async fn test_batch_lands_on_the_timer_and_drains_on_shutdown() {
        let bus = InMemoryBus::new();
        bus.create_topic(TRADES_TOPIC, 1);
        let store = Arc::new(MemoryStore::new());
        let consumer = Arc::new(bus.subscribe(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP));

        let service = TradePersistenceService::new(
            Arc::clone(&store),
            consumer,
            Duration::from_secs(10),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(service.run(shutdown_rx));

        bus.publish(
            TRADES_TOPIC,
            br#"{"messageType":"trades","tradeType":"SELL","volume":"2","time":"2024-03-01T12:00:00Z"}"#.to_vec(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Nothing is written until the batch timer fires.
        assert_eq!(store.trade_count(), 0);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.trade_count(), 1);

        // A second trade arrives and is drained by the shutdown flush.
        bus.publish(
            TRADES_TOPIC,
            br#"{"messageType":"trades","tradeType":"BUY","volume":"3","time":"2024-03-01T12:00:01Z"}"#.to_vec(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.trade_count(), 2);
        assert_eq!(
            bus.committed(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP, 0),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_stored_trades_provider_maps_to_fills() {
        let store = Arc::new(MemoryStore::new());
        let time: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        store
            .upsert_trades(&[Trade::new(Side::Sell, Decimal::from(7), time, 0, 1)])
            .await
            .unwrap();

        let provider = StoredTrades::new(Arc::clone(&store));
        let fills = provider
            .trades_for_period(time, time)
            .await
            .unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].trade_type, Side::Sell);
        assert_eq!(fills[0].volume, Decimal::from(7));
    }
}
