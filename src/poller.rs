use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, warn};

use crate::api::health::HealthState;
use crate::error::AppError;
use crate::fetcher::{FeedStats, QuoteSource};
use crate::state::{BookStore, StalenessTracker};

/// Rotation position plus everything a poll mutates. Owned by the pipeline task.
#[derive(Debug)]
pub struct PollState {
    pub cursor: usize,
    pub store: BookStore,
    pub tracker: StalenessTracker,
}

impl PollState {
    pub fn new(stale_threshold: Duration) -> Self {
        Self {
            cursor: 0,
            store: BookStore::new(),
            tracker: StalenessTracker::new(stale_threshold),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Fetched { book: String, quotes: usize, stats: FeedStats },
    Failed { book: String, error: String },
    /// The rate ceiling refused the call; nothing was sent.
    Throttled { book: String, wait_ms: u64 },
}

impl PollOutcome {
    pub fn book(&self) -> &str {
        match self {
            PollOutcome::Fetched { book, .. }
            | PollOutcome::Failed { book, .. }
            | PollOutcome::Throttled { book, .. } => book,
        }
    }
}

/// One book per tick, round-robin, under the provider's hard rate ceiling.
pub struct Poller {
    source: Arc<dyn QuoteSource>,
    books: Vec<String>,
    limiter: DefaultDirectRateLimiter,
    timeout: Duration,
    health: Arc<HealthState>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        books: Vec<String>,
        rate_limit_per_minute: u32,
        timeout: Duration,
        health: Arc<HealthState>,
    ) -> Self {
        let per_minute = NonZeroU32::new(rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            source,
            books,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            timeout,
            health,
        }
    }

    pub fn books(&self) -> &[String] {
        &self.books
    }

    /// Poll the book under the cursor. The cursor advances whatever the outcome.
    pub async fn poll_next(&self, state: &mut PollState) -> Option<PollOutcome> {
        if self.books.is_empty() {
            return None;
        }
        let idx = state.cursor % self.books.len();
        state.cursor = (idx + 1) % self.books.len();
        let book = self.books[idx].clone();

        if let Err(not_until) = self.limiter.check() {
            let wait_ms = not_until.wait_time_from(DefaultClock::default().now()).as_millis() as u64;
            warn!(book = %book, "skipping fetch: {}", AppError::RateLimited(wait_ms));
            return Some(PollOutcome::Throttled { book, wait_ms });
        }

        let result = match tokio::time::timeout(self.timeout, self.source.fetch_book(&book)).await {
            Ok(r) => r,
            Err(_) => Err(AppError::Timeout(self.timeout.as_millis() as u64)),
        };

        let outcome = match result {
            Ok((quotes, stats)) => {
                let count = quotes.len();
                state.store.replace(&book, quotes);
                state.tracker.record_success(Instant::now());
                self.health.record_fetch_success(
                    &book,
                    count,
                    stats.dropped_events + stats.dropped_quotes,
                    Utc::now(),
                );
                debug!(
                    book = %book,
                    quotes = count,
                    dropped_events = stats.dropped_events,
                    dropped_quotes = stats.dropped_quotes,
                    "book fetched"
                );
                PollOutcome::Fetched { book, quotes: count, stats }
            }
            Err(e) => {
                state.store.mark_failed(&book);
                self.health.record_fetch_failure(&book, &e.to_string());
                warn!(book = %book, "fetch failed: {e}");
                PollOutcome::Failed { book, error: e.to_string() }
            }
        };
        Some(outcome)
    }
}
