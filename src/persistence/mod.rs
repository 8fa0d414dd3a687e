//! Trade persistence pipeline
//!
//! Consumes the `trades` topic, batches writes to the store on a timer, and
//! commits offsets under the loose highest-offset-per-partition policy. Also
//! the backend of the store-side trades RPC for history beyond the memory
//! buffer's window.

pub mod pipeline;
pub mod service;

pub use pipeline::{FlushReport, PersistencePipeline};
pub use service::{StoredTrades, TradePersistenceService};
