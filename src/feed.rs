//! Synthetic market/trade feed
//!
//! Publishes random trades every second and a market interval covering the
//! elapsed span every `MARKET_INTERVAL`. Local-run stand-in for the upstream
//! ingest; the message shapes are the real topic contracts.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::bus::{BusPublisher, MARKET_TOPIC, TRADES_TOPIC};

const TICK: Duration = Duration::from_secs(1);
const MARKET_INTERVAL_TICKS: u32 = 10;

pub async fn run<P: BusPublisher>(publisher: Arc<P>, mut shutdown: watch::Receiver<bool>) {
    info!("synthetic feed started");
    let mut ticker = interval(TICK);
    let mut interval_start = Utc::now();
    let mut ticks = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = Utc::now();
        let trades = rand::thread_rng().gen_range(1..=3);
        for _ in 0..trades {
            let (side, volume) = {
                let mut rng = rand::thread_rng();
                let side = if rng.gen_bool(0.5) { "BUY" } else { "SELL" };
                (side, rng.gen_range(1..=100))
            };
            let payload = json!({
                "messageType": "trades",
                "tradeType": side,
                "volume": volume.to_string(),
                "time": now,
            });
            if let Err(err) = publisher
                .publish(TRADES_TOPIC, payload.to_string().into_bytes())
                .await
            {
                warn!("feed failed to publish trade: {err}");
            }
        }

        ticks += 1;
        if ticks >= MARKET_INTERVAL_TICKS {
            let (buy, sell) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(45..55), rng.gen_range(50..60))
            };
            let payload = json!({
                "messageType": "market",
                "buyPrice": buy.to_string(),
                "sellPrice": sell.to_string(),
                "startTime": interval_start,
                "endTime": now,
            });
            if let Err(err) = publisher
                .publish(MARKET_TOPIC, payload.to_string().into_bytes())
                .await
            {
                warn!("feed failed to publish market interval: {err}");
            }
            interval_start = now;
            ticks = 0;
        }
    }
    info!("synthetic feed stopped");
}
