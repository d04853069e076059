use std::time::Duration;

use crate::error::{AppError, Result};

pub const ODDS_API_URL: &str = "https://odds.oddsblaze.com/";

/// Books polled round-robin, one per tick.
pub const DEFAULT_SPORTSBOOKS: &[&str] = &[
    "draftkings",
    "fanduel",
    "fanduel-yourway",
    "betmgm",
    "caesars",
    "betrivers",
    "fanatics",
    "betparx",
    "fliff",
    "thescore",
    "pinnacle",
    "circa",
    "bet365",
    "bally-bet",
    "hard-rock",
    "prophetx",
];

/// Reference books: fed to the fair-value boundary but never surfaced as best price.
pub const DEFAULT_SHARP_BOOKS: &[&str] = &["pinnacle", "circa"];

/// Hard ceiling imposed by the odds provider.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Per-book fetch timeout (seconds). A slow book delays the next tick, it never stacks ticks.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_FAIR_VALUE_TIMEOUT_SECS: u64 = 10;

/// No successful fetch from any book for this long marks the feed stale.
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 30;

/// Cache entries expire after this many tick intervals.
pub const DEFAULT_CACHE_TTL_TICKS: u32 = 5;

/// Upper bound on a single cache write.
pub const CACHE_WRITE_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct Config {
    pub odds_api_url: String,
    pub odds_api_key: String,
    pub league: String,
    /// Ordered polling rotation (SPORTSBOOKS, comma-separated).
    pub sportsbooks: Vec<String>,
    /// Reference/sharp books excluded from best price (SHARP_BOOKS, comma-separated).
    pub sharp_books: Vec<String>,
    pub tick_interval: Duration,
    pub rate_limit_per_minute: u32,
    pub fetch_timeout: Duration,
    /// Base URL of the fair-value service (FAIR_VALUE_URL).
    pub fair_value_url: String,
    pub fair_value_timeout: Duration,
    pub stale_threshold: Duration,
    /// Optional snapshot hand-off (REDIS_URL). Unset disables the cache.
    pub redis_url: Option<String>,
    pub cache_key_prefix: String,
    pub cache_ttl_ticks: u32,
    pub log_level: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rate_limit_per_minute =
            parse_env("RATE_LIMIT_PER_MINUTE", DEFAULT_RATE_LIMIT_PER_MINUTE)?;
        if rate_limit_per_minute == 0 {
            return Err(AppError::Config(
                "RATE_LIMIT_PER_MINUTE must be greater than zero".to_string(),
            ));
        }

        let sportsbooks = list_env("SPORTSBOOKS", DEFAULT_SPORTSBOOKS);
        if sportsbooks.is_empty() {
            return Err(AppError::Config("SPORTSBOOKS must name at least one book".to_string()));
        }

        let cfg = Self {
            odds_api_url: std::env::var("ODDS_API_URL")
                .unwrap_or_else(|_| ODDS_API_URL.to_string()),
            odds_api_key: std::env::var("ODDS_API_KEY").unwrap_or_default(),
            league: std::env::var("LEAGUE").unwrap_or_else(|_| "nba".to_string()),
            sportsbooks,
            sharp_books: list_env("SHARP_BOOKS", DEFAULT_SHARP_BOOKS),
            tick_interval: Duration::from_millis(parse_env(
                "TICK_INTERVAL_MS",
                DEFAULT_TICK_INTERVAL_MS,
            )?),
            rate_limit_per_minute,
            fetch_timeout: Duration::from_secs(parse_env(
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            fair_value_url: std::env::var("FAIR_VALUE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            fair_value_timeout: Duration::from_secs(parse_env(
                "FAIR_VALUE_TIMEOUT_SECS",
                DEFAULT_FAIR_VALUE_TIMEOUT_SECS,
            )?),
            stale_threshold: Duration::from_secs(parse_env(
                "STALE_THRESHOLD_SECS",
                DEFAULT_STALE_THRESHOLD_SECS,
            )?),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            cache_key_prefix: std::env::var("CACHE_KEY_PREFIX")
                .unwrap_or_else(|_| "propline".to_string()),
            cache_ttl_ticks: parse_env("CACHE_TTL_TICKS", DEFAULT_CACHE_TTL_TICKS)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: parse_env("API_PORT", 3000u16)?,
        };

        // Clamping happens in `run`, once logging is up to report it.
        Ok(cfg)
    }

    /// Shortest tick interval the provider's rate ceiling allows.
    pub fn min_tick_interval(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.rate_limit_per_minute.max(1)))
    }

    /// Clamp the tick interval so one call per tick never exceeds the rate ceiling.
    /// Returns the configured interval when it had to be raised.
    pub fn clamp_tick_interval(&mut self) -> Option<Duration> {
        let min = self.min_tick_interval();
        if self.tick_interval >= min {
            return None;
        }
        let configured = self.tick_interval;
        self.tick_interval = min;
        Some(configured)
    }

    /// A fetch allowed to run past the tick interval delays the next tick.
    pub fn fetch_timeout_outlasts_tick(&self) -> bool {
        self.fetch_timeout >= self.tick_interval
    }

    /// Expiry for cached snapshot entries.
    pub fn cache_ttl(&self) -> Duration {
        self.tick_interval * self.cache_ttl_ticks.max(1)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}

fn list_env(name: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        odds_api_url: "http://127.0.0.1:9/".to_string(),
        odds_api_key: "test".to_string(),
        league: "nba".to_string(),
        sportsbooks: vec!["draftkings".to_string(), "fanduel".to_string(), "pinnacle".to_string()],
        sharp_books: vec!["pinnacle".to_string(), "circa".to_string()],
        tick_interval: Duration::from_millis(1_000),
        rate_limit_per_minute: 60,
        fetch_timeout: Duration::from_secs(2),
        fair_value_url: "http://127.0.0.1:9".to_string(),
        fair_value_timeout: Duration::from_secs(2),
        stale_threshold: Duration::from_secs(30),
        redis_url: None,
        cache_key_prefix: "propline-test".to_string(),
        cache_ttl_ticks: 5,
        log_level: "debug".to_string(),
        api_port: 0,
    }
}
