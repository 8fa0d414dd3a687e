//! Trade memory consumer service
//!
//! Feeds the buffer from the `trades` topic and runs the retention sweep.
//! The buffer is RAM-only, so every delivery commits as soon as it is
//! handled, malformed ones included; after a restart the buffer refills
//! from the committed position and the retention window hides whatever
//! was lost.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::SharedTradeMemory;
use crate::bus::{BusConsumer, Delivery};
use crate::messages::TradeMessage;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct TradeMemoryService<C> {
    consumer: Arc<C>,
    memory: SharedTradeMemory,
}

impl<C: BusConsumer> TradeMemoryService<C> {
    pub fn new(consumer: Arc<C>, memory: SharedTradeMemory) -> Self {
        Self { consumer, memory }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("trade memory service started");
        let mut sweep = interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                delivery = self.consumer.next() => match delivery {
                    Ok(delivery) => self.handle(delivery).await,
                    Err(err) => {
                        warn!("trade memory consumer error: {err}");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    let removed = self.memory.write().await.sweep(chrono::Utc::now());
                    if removed > 0 {
                        debug!("swept {removed} expired trades from memory");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("trade memory service stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        match TradeMessage::parse(&delivery.payload) {
            Ok(msg) => {
                let trade = msg.into_trade(delivery.partition, delivery.offset);
                self.memory.write().await.add(trade);
            }
            Err(err) => warn!(
                "[DLQ] dropping trade message partition={} offset={}: {err}",
                delivery.partition, delivery.offset
            ),
        }

        // Committed either way: the buffer is RAM-only and malformed
        // payloads are dropped, so nothing here is worth a redelivery.
        if let Err(err) = self
            .consumer
            .commit(delivery.partition, delivery.offset + 1)
            .await
        {
            warn!(
                "trade memory commit failed at partition={} offset={}: {err}",
                delivery.partition, delivery.offset
            );
        }
    }
}
