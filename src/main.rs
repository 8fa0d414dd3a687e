//! Service entry point
//!
//! Run modes:
//!
//! - `serve` (default): run every pipeline component wired over the
//!   in-process bus and the PostgreSQL store; `--with-feed` adds the
//!   synthetic publisher for a self-contained local loop.
//! - `report`: print the aggregated PnL view and exit.
//! - `feed`: run only the synthetic publisher against its own bus, for
//!   exercising the topic contracts in isolation.
//!
//! Exits 0 on clean shutdown and 1 when startup fails after the connect
//! retries are exhausted.

use anyhow::{Context, bail};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info};

use intraday_pnl::bus::{
    CALCULATION_GROUP, DEFAULT_PARTITIONS, InMemoryBus, MARKET_TOPIC, TRADES_TOPIC,
    TRADE_MEMORY_GROUP, TRADE_PERSISTENCE_GROUP,
};
use intraday_pnl::config::Settings;
use intraday_pnl::memory::{SharedTradeMemory, TradeMemory, TradeMemoryService};
use intraday_pnl::persistence::{StoredTrades, TradePersistenceService};
use intraday_pnl::retry::{Backoff, retry};
use intraday_pnl::rpc::{TradesRpcClient, serve_trades_rpc, trades_rpc_router};
use intraday_pnl::store::PgStore;
use intraday_pnl::{CalculationPipeline, TradeQueryRouter, feed, logging, report};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    let _log_guard = logging::init(&settings.log);

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("serve");
    match mode {
        "serve" => serve(settings, args.iter().any(|a| a == "--with-feed")).await,
        "report" => run_report(settings).await,
        "feed" => run_feed().await,
        other => bail!("unknown run mode {other:?}; expected serve, report, or feed"),
    }
}

async fn connect_store(settings: &Settings) -> anyhow::Result<Arc<PgStore>> {
    let store = retry(Backoff::default(), "store connect", || {
        PgStore::connect(&settings.database_url, settings.pg_pool_size)
    })
    .await
    .context("store connect failed")?;
    store.init_schema().await.context("schema init failed")?;
    Ok(Arc::new(store))
}

async fn serve(settings: Settings, with_feed: bool) -> anyhow::Result<()> {
    info!("starting intraday pnl services");
    let store = connect_store(&settings).await?;

    let bus = InMemoryBus::new();
    bus.create_topic(TRADES_TOPIC, DEFAULT_PARTITIONS);
    bus.create_topic(MARKET_TOPIC, DEFAULT_PARTITIONS);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    // Trade memory buffer and its consumer.
    let memory: SharedTradeMemory = Arc::new(RwLock::new(TradeMemory::new(
        settings.memory_retention,
        settings.queried_range_retention,
    )));
    let memory_consumer = Arc::new(bus.subscribe(TRADES_TOPIC, TRADE_MEMORY_GROUP));
    handles.push(tokio::spawn(
        TradeMemoryService::new(memory_consumer, Arc::clone(&memory)).run(shutdown_rx.clone()),
    ));

    // Trade persistence pipeline plus its store-backed RPC.
    let persistence_consumer = Arc::new(bus.subscribe(TRADES_TOPIC, TRADE_PERSISTENCE_GROUP));
    handles.push(tokio::spawn(
        TradePersistenceService::new(
            Arc::clone(&store),
            persistence_consumer,
            settings.batch_interval,
        )
        .run(shutdown_rx.clone()),
    ));
    {
        let router = trades_rpc_router(Arc::new(StoredTrades::new(Arc::clone(&store))));
        let addr = settings.persistence_service_addr.clone();
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = serve_trades_rpc(&addr, router, shutdown).await {
                error!("persistence RPC server failed: {err}");
            }
        }));
    }

    // Range-query router in front of memory, falling back to persistence.
    let fallback = Arc::new(TradesRpcClient::new(
        &settings.persistence_service_addr,
        settings.wait_timeout,
    )?);
    let query_router = Arc::new(TradeQueryRouter::new(
        Arc::clone(&memory),
        fallback,
        settings.wait_timeout,
    ));
    {
        let router = trades_rpc_router(query_router);
        let addr = settings.trades_service_addr.clone();
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = serve_trades_rpc(&addr, router, shutdown).await {
                error!("trades RPC server failed: {err}");
            }
        }));
    }

    // Calculation pipeline, fetching trades through the RPC surface.
    let market_consumer = Arc::new(bus.subscribe(MARKET_TOPIC, CALCULATION_GROUP));
    let trades_client = Arc::new(TradesRpcClient::new(
        &settings.trades_service_addr,
        settings.wait_timeout,
    )?);
    handles.push(tokio::spawn(
        CalculationPipeline::new(
            market_consumer,
            Arc::clone(&store),
            trades_client,
            settings.trading_fee_per_mwh,
            settings.market_buffer_size,
            Backoff::default(),
        )
        .run(shutdown_rx.clone()),
    ));

    if with_feed {
        handles.push(tokio::spawn(feed::run(
            Arc::new(bus.clone()),
            shutdown_rx.clone(),
        )));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining");
    shutdown_tx.send(true).ok();
    futures::future::join_all(handles).await;
    info!("clean shutdown");
    Ok(())
}

async fn run_feed() -> anyhow::Result<()> {
    let bus = InMemoryBus::new();
    bus.create_topic(TRADES_TOPIC, DEFAULT_PARTITIONS);
    bus.create_topic(MARKET_TOPIC, DEFAULT_PARTITIONS);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(feed::run(Arc::new(bus), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    shutdown_tx.send(true).ok();
    handle.await.ok();
    Ok(())
}

async fn run_report(settings: Settings) -> anyhow::Result<()> {
    let store = connect_store(&settings).await?;
    let windows = report::pnl_summary(store.as_ref()).await?;

    if windows.is_empty() {
        println!("no pnl records yet");
        return Ok(());
    }
    for window in windows {
        println!(
            "{:<14} {} .. {}  pnl {}",
            window.label, window.start_time, window.end_time, window.pnl
        );
    }
    Ok(())
}
