//! HTTP client of the trades RPC
//!
//! Thin reqwest wrapper with the hard deadline baked into the client; a
//! request that outlives it surfaces as a transport error the caller
//! handles like any other RPC failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{
    TRADES_FOR_PERIOD_PATH, TradesForPeriodRequest, TradesForPeriodResponse, RpcError,
    TradesProvider,
};
use crate::models::TradeFill;

#[derive(Clone)]
pub struct TradesRpcClient {
    http: reqwest::Client,
    url: String,
}

impl TradesRpcClient {
    /// `addr` is `host:port` of a trades RPC server.
    pub fn new(addr: &str, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: format!("http://{addr}{TRADES_FOR_PERIOD_PATH}"),
        })
    }
}

#[async_trait]
impl TradesProvider for TradesRpcClient {
    async fn trades_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, RpcError> {
        let response = self
            .http
            .post(&self.url)
            .json(&TradesForPeriodRequest {
                start_time: start,
                end_time: end,
            })
            .send()
            .await?
            .error_for_status()?;
        let body: TradesForPeriodResponse = response.json().await?;
        Ok(body.trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use crate::rpc::server::trades_rpc_router;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    struct FixedTrades {
        fills: Vec<TradeFill>,
        fail: bool,
    }

    #[async_trait]
    impl TradesProvider for FixedTrades {
        async fn trades_for_period(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<TradeFill>, RpcError> {
            if self.fail {
                Err(RpcError::Internal("backend down".into()))
            } else {
                Ok(self.fills.clone())
            }
        }
    }

    async fn spawn_server(provider: FixedTrades) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let router = trades_rpc_router(Arc::new(provider));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_round_trip_over_http() {
        let fills = vec![TradeFill {
            trade_type: Side::Buy,
            volume: Decimal::from(12),
            time: "2024-03-01T12:00:30Z".parse().unwrap(),
        }];
        let addr = spawn_server(FixedTrades {
            fills: fills.clone(),
            fail: false,
        })
        .await;

        let client = TradesRpcClient::new(&addr, Duration::from_secs(3)).unwrap();
        let answered = client
            .trades_for_period(
                "2024-03-01T12:00:00Z".parse().unwrap(),
                "2024-03-01T12:01:00Z".parse().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(answered, fills);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_client_error() {
        let addr = spawn_server(FixedTrades {
            fills: vec![],
            fail: true,
        })
        .await;

        let client = TradesRpcClient::new(&addr, Duration::from_secs(3)).unwrap();
        let result = client
            .trades_for_period(
                "2024-03-01T12:00:00Z".parse().unwrap(),
                "2024-03-01T12:01:00Z".parse().unwrap(),
            )
            .await;

        assert!(matches!(result, Err(RpcError::Transport(_))));
    }
}
