//! Launch Monitor - production runtime
//!
//! - Loads configuration from the environment (`.env` honored)
//! - Opens SQLite and applies `sql/` migrations
//! - Hydrates previously tracked tokens
//! - Polls new heads and runs one engine pass per block until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin launch_monitor
//!
//! See `EngineConfig::from_env` for the variables it reads.

use dotenv::dotenv;
use env_logger::Env;
use launch_monitor::db::{SqliteTokenStore, TokenStore};
use launch_monitor::ledger::LedgerFacade;
use launch_monitor::rpc::JsonRpcLedger;
use launch_monitor::runtime::run_until_shutdown;
use launch_monitor::types::BlockHeader;
use launch_monitor::{EngineConfig, MonitorEngine};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const BLOCK_CHANNEL_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("🚀 Launch Monitor");

    let config = EngineConfig::from_env()?;
    info!("   ├─ RPC: {}", config.rpc_url);
    info!("   ├─ Platform: {}", config.platform);
    info!(
        "   ├─ Settlement asset: {}",
        config
            .settlement_asset
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    info!("   ├─ Exchanges: {}", config.exchange_addresses.len());
    info!("   ├─ Creator strategy: {}", config.creator_strategy.as_str());
    info!("   ├─ Database: {}", config.db_path);
    info!("   └─ Poll interval: {}ms", config.poll_interval_ms);

    info!("🔧 Initializing database...");
    let persistence: Arc<dyn TokenStore> =
        Arc::new(SqliteTokenStore::open(&config.db_path, &config.schema_dir)?);
    info!("✅ Database initialized");

    let ledger: Arc<dyn LedgerFacade> = Arc::new(JsonRpcLedger::new(
        &config.rpc_url,
        config.poll_interval_ms,
        config.retry.clone(),
    )?);
    let head = ledger.current_block_number().await?;
    info!("✅ Connected to RPC (head block {})", head);

    let mut engine = MonitorEngine::new(&config, ledger.clone(), persistence);
    engine.hydrate().await?;
    engine.start().await?;

    let (tx, rx) = mpsc::channel::<BlockHeader>(BLOCK_CHANNEL_BUFFER);
    let subscriber = ledger.clone();
    let subscription = tokio::spawn(async move { subscriber.subscribe_new_blocks(tx).await });
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        }
    };

    let result = run_until_shutdown(
        &mut engine,
        rx,
        shutdown,
        Duration::from_millis(config.shutdown_grace_ms),
    )
    .await;

    subscription.abort();
    let subscription_error =
        match tokio::time::timeout(Duration::from_millis(100), subscription).await {
            Ok(Ok(Err(e))) => Some(e),
            _ => None,
        };

    let summary = result?;
    info!(
        "✅ Launch Monitor stopped ({} blocks, {} new tokens, {} tracked)",
        summary.blocks_processed,
        summary.tokens_detected,
        engine.store().len()
    );

    if let Some(e) = subscription_error {
        error!("❌ Head subscription ended: {}", e);
        return Err(e.into());
    }
    Ok(())
}
