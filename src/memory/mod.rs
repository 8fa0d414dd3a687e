//! Trade memory buffer and its consumer service
//!
//! Recent trades are held in RAM with time-based retention so range queries
//! for fresh market intervals never touch the store. The buffer itself is
//! synchronous; the service wraps it in a shared lock and feeds it from the
//! bus.

use std::sync::Arc;
use tokio::sync::RwLock;

pub mod buffer;
pub mod service;

pub use buffer::TradeMemory;
pub use service::TradeMemoryService;

/// Handle shared between the consumer service and the range-query router.
pub type SharedTradeMemory = Arc<RwLock<TradeMemory>>;
