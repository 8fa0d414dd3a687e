//! HTTP side of the trades RPC
//!
//! One POST route; the provider behind it decides what a range query means.
//! Provider failures become a bare 500; the error detail stays in the
//! server's log, not on the wire.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use super::{
    TRADES_FOR_PERIOD_PATH, TradesForPeriodRequest, TradesForPeriodResponse, TradesProvider,
};

pub fn trades_rpc_router<P: TradesProvider>(provider: Arc<P>) -> Router {
    Router::new()
        .route(TRADES_FOR_PERIOD_PATH, post(get_trades_for_period::<P>))
        .with_state(provider)
}

async fn get_trades_for_period<P: TradesProvider>(
    State(provider): State<Arc<P>>,
    Json(request): Json<TradesForPeriodRequest>,
) -> Result<Json<TradesForPeriodResponse>, StatusCode> {
    match provider
        .trades_for_period(request.start_time, request.end_time)
        .await
    {
        Ok(trades) => Ok(Json(TradesForPeriodResponse { trades })),
        Err(err) => {
            error!("trades RPC failed: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Serve the router until the shutdown signal flips.
pub async fn serve_trades_rpc(
    addr: &str,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("trades RPC listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
