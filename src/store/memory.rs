//! In-memory store with the same key discipline as the real one
//!
//! Used by the pipeline tests and local wiring. Unique indexes, idempotent
//! upserts and the atomic market+PnL write behave exactly as the Postgres
//! implementation does; `poison_trade` and `set_unavailable` inject the
//! failure modes the flush and commit machinery must survive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::{BulkOutcome, MarketStore, PnlStore, StoreError, TradeStore, WriteOutcome};
use crate::models::{MarketInterval, PnlRecord, Trade};

type IntervalKey = (DateTime<Utc>, DateTime<Utc>);

#[derive(Default)]
struct MemoryState {
    trades: BTreeMap<(i32, i64), Trade>,
    markets: HashMap<IntervalKey, MarketInterval>,
    market_coords: HashSet<(i32, i64)>,
    pnls: HashMap<IntervalKey, PnlRecord>,
    poisoned_trades: HashSet<(i32, i64)>,
    unavailable: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Mark one trade key so its upsert fails (a partial bulk failure).
    pub fn poison_trade(&self, partition: i32, offset: i64) {
        self.state
            .lock()
            .unwrap()
            .poisoned_trades
            .insert((partition, offset));
    }

    pub fn trade_count(&self) -> usize {
        self.state.lock().unwrap().trades.len()
    }

    pub fn stored_trades(&self) -> Vec<Trade> {
        self.state.lock().unwrap().trades.values().cloned().collect()
    }

    pub fn market_for(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<MarketInterval> {
        self.state.lock().unwrap().markets.get(&(start, end)).cloned()
    }

    pub fn pnl_for(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<PnlRecord> {
        self.state.lock().unwrap().pnls.get(&(start, end)).cloned()
    }

    pub fn pnl_count(&self) -> usize {
        self.state.lock().unwrap().pnls.len()
    }

    pub fn insert_pnl_directly(&self, pnl: PnlRecord) {
        let mut state = self.state.lock().unwrap();
        state
            .pnls
            .insert((pnl.market_start_time, pnl.market_end_time), pnl);
    }

    fn check_available(state: &MemoryState) -> Result<(), StoreError> {
        if state.unavailable {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn upsert_trades(&self, trades: &[Trade]) -> Result<BulkOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        let mut outcome = BulkOutcome::default();
        for trade in trades {
            let key = (trade.partition, trade.offset);
            if state.poisoned_trades.contains(&key) {
                outcome.failed += 1;
            } else if state.trades.insert(key, trade.clone()).is_some() {
                outcome.matched += 1;
            } else {
                outcome.upserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn trades_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        let mut trades: Vec<Trade> = state
            .trades
            .values()
            .filter(|t| t.time >= start && t.time <= end)
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.time);
        Ok(trades)
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn interval_exists(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state.markets.contains_key(&(start, end)))
    }

    async fn insert_market_with_pnl(
        &self,
        market: &MarketInterval,
        pnl: &PnlRecord,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        let interval = market.interval_key();
        let coords = (market.partition, market.offset);
        if state.markets.contains_key(&interval)
            || state.market_coords.contains(&coords)
            || state.pnls.contains_key(&interval)
        {
            return Ok(WriteOutcome::AlreadyExists);
        }

        state.markets.insert(interval, market.clone());
        state.market_coords.insert(coords);
        state.pnls.insert(interval, pnl.clone());
        Ok(WriteOutcome::Written)
    }
}

#[async_trait]
impl PnlStore for MemoryStore {
    async fn latest_pnl(&self) -> Result<Option<PnlRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state
            .pnls
            .values()
            .max_by_key(|p| p.market_end_time)
            .cloned())
    }

    async fn pnls_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<PnlRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        let mut pnls: Vec<PnlRecord> = state
            .pnls
            .values()
            .filter(|p| p.market_end_time >= cutoff)
            .cloned()
            .collect();
        pnls.sort_by_key(|p| p.market_end_time);
        Ok(pnls)
    }
}
