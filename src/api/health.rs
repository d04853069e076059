//! Shared health state for the /health endpoint.
//! Written by the pipeline task, read by the API and viewer sessions.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::aggregator::AggregationStats;

/// Fetch status of one sportsbook.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Quotes accepted from the last successful fetch.
    pub quotes: usize,
    /// Events and quotes dropped as malformed in the last successful fetch.
    pub dropped: usize,
}

/// Counters from the most recent completed cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleCounters {
    pub books_aggregated: usize,
    pub quotes_seen: usize,
    pub out_of_scope: usize,
    pub live_skipped: usize,
    pub bad_price: usize,
    pub props: usize,
    pub divergent_names: usize,
    pub rows: usize,
}

impl CycleCounters {
    pub fn from_stats(stats: &AggregationStats, rows: usize) -> Self {
        Self {
            books_aggregated: stats.books,
            quotes_seen: stats.quotes_seen,
            out_of_scope: stats.out_of_scope,
            live_skipped: stats.live_skipped,
            bad_price: stats.bad_price,
            props: stats.props,
            divergent_names: stats.divergent_names.len(),
            rows,
        }
    }
}

#[derive(Default)]
pub struct HealthState {
    /// Per-book fetch status keyed by book id.
    pub books: DashMap<String, BookHealth>,
    /// Unix millis of the last successful fetch from any book (0 = never).
    last_success_ms: AtomicU64,
    fair_value_available: AtomicBool,
    cache_enabled: AtomicBool,
    cache_write_failures: AtomicU64,
    viewers: AtomicUsize,
    last_cycle: Mutex<CycleCounters>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch_success(&self, book: &str, quotes: usize, dropped: usize, at: DateTime<Utc>) {
        let mut entry = self.books.entry(book.to_string()).or_default();
        entry.last_success = Some(at);
        entry.last_error = None;
        entry.consecutive_failures = 0;
        entry.quotes = quotes;
        entry.dropped = dropped;
        drop(entry);

        let ms = at.timestamp_millis().max(0) as u64;
        self.last_success_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self, book: &str, error: &str) {
        let mut entry = self.books.entry(book.to_string()).or_default();
        entry.last_error = Some(error.to_string());
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms as i64),
        }
    }

    pub fn set_fair_value_available(&self, v: bool) {
        self.fair_value_available.store(v, Ordering::Relaxed);
    }

    pub fn fair_value_available(&self) -> bool {
        self.fair_value_available.load(Ordering::Relaxed)
    }

    pub fn set_cache_enabled(&self, v: bool) {
        self.cache_enabled.store(v, Ordering::Relaxed);
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    pub fn inc_cache_write_failures(&self) {
        self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_write_failures(&self) -> u64 {
        self.cache_write_failures.load(Ordering::Relaxed)
    }

    pub fn viewer_connected(&self) {
        self.viewers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn viewer_disconnected(&self) {
        let _ = self
            .viewers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }

    pub fn set_last_cycle(&self, counters: CycleCounters) {
        if let Ok(mut c) = self.last_cycle.lock() {
            *c = counters;
        }
    }

    pub fn last_cycle(&self) -> CycleCounters {
        self.last_cycle.lock().map(|c| c.clone()).unwrap_or_default()
    }
}
