use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::aggregate;
use crate::api::health::{CycleCounters, HealthState};
use crate::api::latency::LatencyStats;
use crate::cache::SnapshotSink;
use crate::config::{Config, CACHE_WRITE_TIMEOUT_MS};
use crate::fair_value::FairValueSource;
use crate::odds::format_american;
use crate::opposite::build_opposite_lookup;
use crate::poller::{PollOutcome, PollState, Poller};
use crate::rows::build_rows;
use crate::state::SnapshotPublisher;

/// What one tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub cycle: u64,
    pub poll: Option<PollOutcome>,
    pub props: usize,
    pub rows: usize,
    pub fair_value_available: bool,
    pub stale: bool,
    pub elapsed: Duration,
}

/// Poll → aggregate → opposite lookup → fair value → rows → publish, once per tick.
pub struct Pipeline {
    poller: Poller,
    fair_value: Arc<dyn FairValueSource>,
    publisher: SnapshotPublisher,
    cache: Option<Arc<dyn SnapshotSink>>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    tick_interval: Duration,
    sharp_books: Vec<String>,
    cache_ttl: Duration,
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        poller: Poller,
        fair_value: Arc<dyn FairValueSource>,
        publisher: SnapshotPublisher,
        cache: Option<Arc<dyn SnapshotSink>>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        health.set_cache_enabled(cache.is_some());
        Self {
            poller,
            fair_value,
            publisher,
            cache,
            health,
            latency,
            tick_interval: cfg.tick_interval,
            sharp_books: cfg.sharp_books.clone(),
            cache_ttl: cfg.cache_ttl(),
        }
    }

    /// Drive ticks until the shutdown signal flips. Any in-flight tick is dropped.
    pub async fn run(self, mut state: PollState, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            books = self.poller.books().len(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "Pipeline started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                report = self.tick(&mut state) => log_tick(&report),
                _ = shutdown.changed() => break,
            }
        }

        info!("Pipeline stopped");
    }

    pub async fn tick(&self, state: &mut PollState) -> TickReport {
        let started = Instant::now();

        let poll = self.poller.poll_next(state).await;

        let aggregation = aggregate(state.store.confirmed_feeds());
        let opposites = build_opposite_lookup(&aggregation.props);
        let fair_value = self.fair_value.evaluate(&aggregation.props, &opposites).await;

        let rows = build_rows(
            aggregation.props.values(),
            &fair_value,
            &self.sharp_books,
            Utc::now(),
        );
        let row_count = rows.len();
        if let Some(top) = rows.first() {
            debug!(
                key = %top.key,
                best_book = %top.best_book,
                best_price = %format_american(top.best_price),
                edge_pct = ?top.edge_pct,
                "top row"
            );
        }
        let stale = state.tracker.is_stale(Instant::now());
        let snapshot = self.publisher.publish(rows, stale, Utc::now());

        if let Some(cache) = &self.cache {
            let bound = Duration::from_millis(CACHE_WRITE_TIMEOUT_MS);
            match tokio::time::timeout(bound, cache.write(&snapshot, self.cache_ttl)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.health.inc_cache_write_failures();
                    warn!(cycle = snapshot.cycle, "Cache write failed: {e}");
                }
                Err(_) => {
                    self.health.inc_cache_write_failures();
                    warn!(cycle = snapshot.cycle, "Cache write timed out after {CACHE_WRITE_TIMEOUT_MS}ms");
                }
            }
        }

        let elapsed = started.elapsed();
        self.latency.record(elapsed);
        self.health.set_fair_value_available(fair_value.is_available());
        self.health
            .set_last_cycle(CycleCounters::from_stats(&aggregation.stats, row_count));

        TickReport {
            cycle: snapshot.cycle,
            poll,
            props: aggregation.stats.props,
            rows: row_count,
            fair_value_available: fair_value.is_available(),
            stale,
            elapsed,
        }
    }
}

fn log_tick(report: &TickReport) {
    let book = report.poll.as_ref().map(PollOutcome::book).unwrap_or("-");
    let fetch = match &report.poll {
        Some(PollOutcome::Fetched { .. }) => "ok",
        Some(PollOutcome::Failed { .. }) => "failed",
        Some(PollOutcome::Throttled { .. }) => "throttled",
        None => "idle",
    };
    if report.stale {
        warn!(cycle = report.cycle, book, fetch, "Feed is stale: no successful fetch within threshold");
    }
    info!(
        cycle = report.cycle,
        book,
        fetch,
        props = report.props,
        rows = report.rows,
        fair_value = report.fair_value_available,
        stale = report.stale,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Cycle {} published: {} rows",
        report.cycle,
        report.rows,
    );
    debug!(?report, "tick report");
}
