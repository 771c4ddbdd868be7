//! GlobeWatch backend
//!
//! Consumes the detection backend's alert stream, geolocates alert
//! sources and serves globe-ready snapshots over HTTP.

mod api;
mod config;
mod logic;

use api::AppState;
use config::Config;
use logic::geo::GeoResolver;
use logic::pipeline::{DashboardStats, IngestPipeline, SharedStats, SharedStore};
use logic::store::RetentionStore;
use logic::stream::{preload_recent, BackoffPolicy, SharedStreamStatus, StreamClient, StreamStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    log::info!("Starting GlobeWatch backend on port {}", config.port);

    let cache_path = match &config.geo_cache_file {
        Some(path) => path.clone(),
        None => GeoResolver::default_cache_path(),
    };
    let resolver = Arc::new(GeoResolver::new(config.geo_api_url.clone(), cache_path));
    log::info!("Geolocation cache loaded: {} entries", resolver.cache_len());

    let store: SharedStore = Arc::new(RwLock::new(RetentionStore::new()));
    let stats: SharedStats = Arc::new(RwLock::new(DashboardStats::default()));
    let stream_status: SharedStreamStatus = Arc::new(RwLock::new(StreamStatus::Disconnected));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (alert_tx, mut alert_rx) = mpsc::channel(config.channel_capacity);

    // Single ingest task; the only writer of the store and stats. Must
    // be running before the preload so a batch larger than the channel
    // capacity drains instead of blocking startup.
    let pipeline = IngestPipeline::new(resolver, store.clone(), stats.clone());
    let ingest = tokio::spawn(async move {
        while let Some(alert) = alert_rx.recv().await {
            pipeline.ingest(alert).await;
        }
        log::info!("Ingest channel closed, ingest task stopping");
    });

    // Replay recent alerts so the globe is populated at startup.
    let http = reqwest::Client::new();
    match preload_recent(&http, &config.alerts_url, config.preload_limit, &alert_tx).await {
        Ok(count) => log::info!("Preloaded {} recent alerts", count),
        Err(e) => log::warn!("Recent-alerts preload failed: {}", e),
    }

    let client = StreamClient::new(
        config.stream_url.clone(),
        BackoffPolicy::fixed(Duration::from_secs(config.reconnect_delay_secs)),
        stream_status.clone(),
    );
    let stream_task = tokio::spawn(client.run(alert_tx, shutdown_rx.clone()));

    // Periodic marker decay so expiry does not depend on reads.
    let decay_store = store.clone();
    let mut decay_shutdown = shutdown_rx.clone();
    let decay_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = tick.tick() => decay_store.write().decay_markers(chrono::Utc::now()),
                _ = decay_shutdown.changed() => break,
            }
        }
    });

    let state = AppState {
        store,
        stats,
        stream_status,
    };
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    log::info!("Snapshot API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    stream_task.await?;
    decay_task.await?;
    ingest.await?;

    log::info!("GlobeWatch backend stopped");
    Ok(())
}
