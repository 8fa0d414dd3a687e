//! Intraday PnL - stream-join and persistence pipeline
//!
//! Joins two partitioned bus streams (market intervals and trades) into
//! persisted profit-and-loss records, one per interval:
//!
//! ```text
//!                    ┌──────────────┐
//!   trades topic ───▶│ trade memory │◀──── range-query router ◀─┐
//!              │     │   (buffer)   │        │ (bounded wait)   │ trades RPC
//!              │     └──────────────┘        ▼                  │
//!              │     ┌──────────────┐   ┌─────────┐      ┌─────────────┐
//!              └────▶│ persistence  │──▶│  store  │◀─────│ calculation │◀── market topic
//!                    │ (batch+commit)│  │ (pg)    │      │ (pnl+commit)│
//!                    └──────────────┘   └─────────┘      └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Trade, market interval and PnL records
//! - [`messages`] - bus wire contracts and validation
//! - [`bus`] - partitioned-log contract plus the in-process implementation
//! - [`store`] - repository traits, Postgres and in-memory backends
//! - [`memory`] - bounded-retention trade buffer and its consumer
//! - [`persistence`] - batched trade writes with loose offset commits
//! - [`router`] - memory-or-store range queries with the bounded wait
//! - [`calc`] - per-interval PnL with in-order commits per partition
//! - [`report`] - three-window aggregated PnL view
//! - [`rpc`] - trades RPC server and client
//! - [`pnl`] - decimal PnL arithmetic
//! - [`feed`] - synthetic publisher for local runs

pub mod bus;
pub mod calc;
pub mod config;
pub mod feed;
pub mod logging;
pub mod memory;
pub mod messages;
pub mod models;
pub mod persistence;
pub mod pnl;
pub mod report;
pub mod retry;
pub mod router;
pub mod rpc;
pub mod store;

// Convenient re-exports at crate root
pub use calc::CalculationPipeline;
pub use config::Settings;
pub use memory::{TradeMemory, TradeMemoryService};
pub use models::{MarketInterval, PnlRecord, Side, Trade, TradeFill};
pub use persistence::TradePersistenceService;
pub use router::TradeQueryRouter;
pub use store::{MemoryStore, PgStore};
