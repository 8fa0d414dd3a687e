//! Store contract
//!
//! The durable store is external; the pipelines program against these
//! repository traits. Three collections, three unique keys:
//!
//! - `trades`   unique on `(partition, offset)`, secondary on `time`
//! - `markets`  unique on `(partition, offset)` and on `(start_time, end_time)`
//! - `pnls`     unique on `(market_start_time, market_end_time)`
//!
//! Every write is idempotent under redelivery because of those keys. A
//! duplicate-key conflict is a fact, not a failure: implementations surface
//! it as [`WriteOutcome::AlreadyExists`] or a `matched` count, never as an
//! error the pipelines must special-case.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{MarketInterval, PnlRecord, Trade};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result of a bulk trade upsert. `failed` operations stay in the store's
/// redelivery path; `matched` are idempotent duplicates and count as success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub upserted: u64,
    pub matched: u64,
    pub failed: u64,
}

impl BulkOutcome {
    pub fn successful(&self) -> u64 {
        self.upserted + self.matched
    }
}

/// Result of the atomic market+PnL write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// A concurrent or earlier writer already persisted this interval.
    AlreadyExists,
}

#[async_trait]
pub trait TradeStore: Send + Sync + 'static {
    /// Upsert each trade keyed by `(partition, offset)`. Per-document
    /// failures are reported in the outcome rather than aborting the batch.
    async fn upsert_trades(&self, trades: &[Trade]) -> Result<BulkOutcome, StoreError>;

    /// All stored trades with `start <= time <= end`, ascending by time.
    async fn trades_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError>;
}

#[async_trait]
pub trait MarketStore: Send + Sync + 'static {
    /// Whether a market record exists for exactly this interval.
    async fn interval_exists(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Insert the market record and its PnL record in one transaction.
    /// Either both land or neither does; a duplicate on either key means a
    /// concurrent writer won and reports [`WriteOutcome::AlreadyExists`].
    async fn insert_market_with_pnl(
        &self,
        market: &MarketInterval,
        pnl: &PnlRecord,
    ) -> Result<WriteOutcome, StoreError>;
}

#[async_trait]
pub trait PnlStore: Send + Sync + 'static {
    /// Most recent PnL record by `market_end_time`.
    async fn latest_pnl(&self) -> Result<Option<PnlRecord>, StoreError>;

    /// All PnL records with `market_end_time >= cutoff`, ascending.
    async fn pnls_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<PnlRecord>, StoreError>;
}
