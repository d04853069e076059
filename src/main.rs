mod aggregator;
mod api;
mod cache;
mod config;
mod error;
mod fair_value;
mod fetcher;
mod odds;
mod opposite;
mod pipeline;
mod poller;
mod rows;
mod state;
mod types;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::cache::{SnapshotCache, SnapshotSink};
use crate::config::Config;
use crate::error::Result;
use crate::fair_value::HttpFairValueClient;
use crate::fetcher::HttpQuoteSource;
use crate::pipeline::Pipeline;
use crate::poller::{PollState, Poller};
use crate::state::SnapshotPublisher;
use crate::types::Snapshot;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(mut cfg: Config) -> Result<()> {
    if let Some(configured) = cfg.clamp_tick_interval() {
        warn!(
            configured_ms = configured.as_millis() as u64,
            min_ms = cfg.tick_interval.as_millis() as u64,
            "TICK_INTERVAL_MS below rate ceiling of {}/min, clamping to {}ms",
            cfg.rate_limit_per_minute,
            cfg.tick_interval.as_millis(),
        );
    }
    if cfg.fetch_timeout_outlasts_tick() {
        warn!(
            fetch_timeout_ms = cfg.fetch_timeout.as_millis() as u64,
            tick_ms = cfg.tick_interval.as_millis() as u64,
            "FETCH_TIMEOUT_SECS is not shorter than the tick interval: a slow book delays the next tick"
        );
    }
    if cfg.odds_api_key.is_empty() {
        warn!("ODDS_API_KEY not set: every upstream fetch will be rejected");
    }
    info!(
        "Polling {} books for {} every {}ms (ceiling {}/min), fair value at {}",
        cfg.sportsbooks.len(),
        cfg.league,
        cfg.tick_interval.as_millis(),
        cfg.rate_limit_per_minute,
        cfg.fair_value_url,
    );

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let (publisher, snapshots) = SnapshotPublisher::new(Snapshot::empty(Utc::now()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Optional snapshot hand-off ---
    let cache: Option<Arc<dyn SnapshotSink>> = match &cfg.redis_url {
        None => {
            info!("REDIS_URL not set: snapshot cache disabled");
            None
        }
        Some(url) => {
            match SnapshotCache::connect(url, &cfg.cache_key_prefix, Duration::from_secs(5)).await {
                Ok(c) => Some(Arc::new(c) as Arc<dyn SnapshotSink>),
                Err(e) => {
                    warn!("Redis unavailable, running without snapshot cache: {e}");
                    None
                }
            }
        }
    };

    // --- Pipeline ---
    let source = Arc::new(HttpQuoteSource::new(&cfg)?);
    let fair_value = Arc::new(HttpFairValueClient::new(&cfg.fair_value_url, cfg.fair_value_timeout)?);
    let poller = Poller::new(
        source,
        cfg.sportsbooks.clone(),
        cfg.rate_limit_per_minute,
        cfg.fetch_timeout,
        Arc::clone(&health),
    );
    let pipeline = Pipeline::new(
        &cfg,
        poller,
        fair_value,
        publisher,
        cache,
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    let pipeline_task = tokio::spawn(pipeline.run(
        PollState::new(cfg.stale_threshold),
        shutdown_rx.clone(),
    ));

    // --- HTTP API + viewer channel ---
    let app = router(ApiState {
        snapshots,
        health,
        latency,
        shutdown: shutdown_rx.clone(),
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    if let Err(e) = pipeline_task.await {
        error!("Pipeline task ended abnormally: {e}");
    }
    info!("Shutdown complete");
    Ok(())
}
