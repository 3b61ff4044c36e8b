// =============================================================================
// Vantage Market Scanner — Main Entry Point
// =============================================================================
//
// Real-time market scanner core: consumes the raw snapshot stream, enriches
// every ticker with derived indicators, classifies the result against the
// system categories and all user scans through a shared RETE network, and
// fans incremental match deltas out to subscribers.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod db;
mod enrichment;
mod events;
mod indicators;
mod market_data;
mod publish;
mod rete;
mod runtime_config;
mod store;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::db::FilterDb;
use crate::enrichment::EnrichmentPipeline;
use crate::events::EventBus;
use crate::publish::DeltaPublisher;
use crate::rete::ReteManager;
use crate::runtime_config::RuntimeConfig;
use crate::store::SnapshotStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Vantage Market Scanner — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override endpoints from env if available.
    if let Ok(url) = std::env::var("SCANNER_REDIS_URL") {
        config.redis_url = url;
    }
    if let Ok(path) = std::env::var("SCANNER_DB_PATH") {
        config.db_path = path;
    }
    if let Ok(addr) = std::env::var("SCANNER_BIND_ADDR") {
        config.bind_addr = addr;
    }

    info!(
        redis_url = %config.redis_url,
        db_path = %config.db_path,
        bind_addr = %config.bind_addr,
        "configuration resolved"
    );

    // ── 2. External stores ───────────────────────────────────────────────
    let store =
        SnapshotStore::connect(&config.redis_url, config.io_timeout(), config.store_ttls())
            .await?;

    let filter_db = match FilterDb::open(&config.db_path) {
        Ok(db) => Some(db),
        Err(e) => {
            error!(error = %e, "failed to open filter database — user scans disabled");
            None
        }
    };

    // ── 3. Rule network ──────────────────────────────────────────────────
    let rete = Arc::new(ReteManager::new(filter_db));
    if let Err(e) = rete.reload_rules().await {
        error!(error = %e, "initial rule load failed — starting with empty network");
    }

    // ── 4. Shared state ──────────────────────────────────────────────────
    let publisher = Arc::new(DeltaPublisher::new());
    let bus = Arc::new(EventBus::new());
    let state = Arc::new(AppState::new(config.clone(), rete.clone(), publisher.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 5. Rules-changed listener ────────────────────────────────────────
    {
        let manager = rete.clone();
        let client = store.client().clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    rete::manager::listen_for_rule_changes(manager.clone(), client.clone()).await
                {
                    error!(error = %e, "rules-changed listener error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    // ── 6. Periodic safety reload ────────────────────────────────────────
    tokio::spawn(rete::manager::run_safety_reload(
        rete.clone(),
        config.safety_reload_interval(),
        shutdown_rx.clone(),
    ));

    // ── 7. Market-event listener (day change / session close) ────────────
    {
        let client = store.client().clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = events::run_event_listener(client.clone(), bus.clone()).await {
                    error!(error = %e, "market-event listener error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    // ── 8. Enrichment pipeline ───────────────────────────────────────────
    let pipeline = EnrichmentPipeline::new(store.clone(), state.clone(), bus.clone());
    tokio::spawn(pipeline.run_loop(shutdown_rx.clone()));

    // ── 9. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = config.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "API server listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "API server failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind API server"),
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 10. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);
    // Let the pipeline finish its in-flight cycle.
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    info!("Vantage Market Scanner shut down complete.");
    Ok(())
}
