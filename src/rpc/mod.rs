//! Trades RPC: `GetTradesForPeriod`
//!
//! JSON over HTTP. The same request/response shape fronts two backends: the
//! persistence service (store-backed history) and the range-query router
//! (memory buffer with store fallback). Servers map internal failures to
//! HTTP 500; the router additionally swallows downstream failures and
//! answers with an empty list instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TradeFill;

pub mod client;
pub mod server;

pub use client::TradesRpcClient;
pub use server::{serve_trades_rpc, trades_rpc_router};

pub const TRADES_FOR_PERIOD_PATH: &str = "/rpc/trades-for-period";

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Anything that can answer a trade range query.
#[async_trait]
pub trait TradesProvider: Send + Sync + 'static {
    async fn trades_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, RpcError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesForPeriodRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradesForPeriodResponse {
    pub trades: Vec<TradeFill>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let req = TradesForPeriodRequest {
            start_time: "2024-03-01T12:00:00Z".parse().unwrap(),
            end_time: "2024-03-01T12:01:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["startTime"], "2024-03-01T12:00:00Z");
        assert_eq!(json["endTime"], "2024-03-01T12:01:00Z");
    }
}
