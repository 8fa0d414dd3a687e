//! Calculation pipeline
//!
//! Consumes the `market` topic, joins each interval against the trades that
//! settled inside it, writes the market and PnL records atomically, and
//! commits offsets strictly in order per partition while intervals process
//! concurrently.

pub mod pipeline;
pub mod recent;
pub mod tracker;

pub use pipeline::{CalcError, CalculationPipeline, ProcessOutcome};
pub use recent::RecentIntervals;
pub use tracker::PartitionTracker;
