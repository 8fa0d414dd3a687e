//! Message bus contract
//!
//! The pipelines only ever see these traits. A topic is a set of partitions;
//! each partition is an append-only log with monotonically increasing
//! offsets. Delivery is at-least-once: consumer groups track a committed
//! resume position per partition and anything past it may be redelivered
//! after a restart or rebalance.
//!
//! Committing is always manual and always carries the *next* offset to read,
//! never the offset of the message being acknowledged.

use async_trait::async_trait;
use thiserror::Error;

pub mod log;

pub use log::InMemoryBus;

pub const TRADES_TOPIC: &str = "trades";
pub const MARKET_TOPIC: &str = "market";

pub const TRADE_MEMORY_GROUP: &str = "trade-memory-service-group";
pub const TRADE_PERSISTENCE_GROUP: &str = "trade-persistence-service-group";
pub const CALCULATION_GROUP: &str = "calculation-service-group";

/// Default partition count for auto-created topics.
pub const DEFAULT_PARTITIONS: usize = 3;

/// One message as handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),

    #[error("commit rejected: {0}")]
    CommitRejected(String),

    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Subscription handle of one consumer-group member.
#[async_trait]
pub trait BusConsumer: Send + Sync + 'static {
    /// Wait for the next delivery on this subscription.
    async fn next(&self) -> Result<Delivery, BusError>;

    /// Record `next_offset` as the group's resume position on `partition`.
    async fn commit(&self, partition: i32, next_offset: i64) -> Result<(), BusError>;
}

#[async_trait]
pub trait BusPublisher: Send + Sync + 'static {
    /// Append `payload` to `topic`, returning the assigned `(partition, offset)`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(i32, i64), BusError>;
}
