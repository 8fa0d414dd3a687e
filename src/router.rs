//! Trade range-query router
//!
//! Picks the answer source for `GetTradesForPeriod`: the memory buffer when
//! it holds trades for the span, otherwise the persistence RPC.
//!
//! A market interval `[a, b]` is often delivered milliseconds after `b`
//! while trades with `time <= b` are still in flight. Before answering from
//! memory the router therefore waits, polling up to the RPC deadline,
//! until the buffer has observed a trade strictly after `b`: strong evidence
//! that everything inside the span has been buffered.
//!
//! A persistence-side failure is answered with an empty list; a missing
//! trade shows up as zero PnL downstream, which is preferred over failing
//! the interval.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::memory::SharedTradeMemory;
use crate::models::TradeFill;
use crate::rpc::{RpcError, TradesProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct TradeQueryRouter<H> {
    memory: SharedTradeMemory,
    history: Arc<H>,
    wait_timeout: Duration,
}

impl<H: TradesProvider> TradeQueryRouter<H> {
    pub fn new(memory: SharedTradeMemory, history: Arc<H>, wait_timeout: Duration) -> Self {
        Self {
            memory,
            history,
            wait_timeout,
        }
    }

    /// All trades with `start <= time <= end`, from memory or history.
    pub async fn get_trades_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TradeFill> {
        let (t0, has_hits) = {
            let mut memory = self.memory.write().await;
            memory.update_queried_range(start, end, Utc::now());
            (memory.last_trade_time(), memory.has_any(start, end))
        };

        if has_hits {
            self.wait_for_trade_after(t0, end).await;
            return self
                .memory
                .read()
                .await
                .query(start, end)
                .iter()
                .map(TradeFill::from)
                .collect();
        }

        match timeout(self.wait_timeout, self.history.trades_for_period(start, end)).await {
            Ok(Ok(fills)) => fills,
            Ok(Err(err)) => {
                warn!("trade history query failed, answering empty: {err}");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "trade history query exceeded {:?}, answering empty",
                    self.wait_timeout
                );
                Vec::new()
            }
        }
    }

    /// Wait until the buffer observes a trade newer than `end`, or give up
    /// after the deadline. Returns immediately if `t0` is already past `end`.
    async fn wait_for_trade_after(&self, t0: Option<DateTime<Utc>>, end: DateTime<Utc>) {
        if t0.is_some_and(|t| t > end) {
            return;
        }

        let deadline = Instant::now() + self.wait_timeout;
        loop {
            sleep(POLL_INTERVAL).await;
            let t1 = self.memory.read().await.last_trade_time();
            if t1 != t0 && t1.is_some_and(|t| t > end) {
                return;
            }
            if Instant::now() >= deadline {
                debug!("no trade newer than {end} arrived within {:?}", self.wait_timeout);
                return;
            }
        }
    }
}

/// The router itself answers the trades RPC (and never fails).
#[async_trait::async_trait]
impl<H: TradesProvider> TradesProvider for TradeQueryRouter<H> {
    async fn trades_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, RpcError> {
        Ok(self.get_trades_for_period(start, end).await)
    }
}
