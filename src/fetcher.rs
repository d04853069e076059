use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::odds::RawPrice;
use crate::types::{Line, RawBookQuote, Side};

/// Counters for one parsed provider response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedStats {
    pub events: usize,
    pub quotes: usize,
    pub dropped_events: usize,
    pub dropped_quotes: usize,
}

/// Where the poller gets one book's full quote set from.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_book(&self, book: &str) -> Result<(Vec<RawBookQuote>, FeedStats)>;
}

/// HTTP odds provider: one GET per book, parameterized by book and league.
pub struct HttpQuoteSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    league: String,
}

impl HttpQuoteSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.odds_api_url.clone(),
            api_key: cfg.odds_api_key.clone(),
            league: cfg.league.clone(),
        })
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch_book(&self, book: &str) -> Result<(Vec<RawBookQuote>, FeedStats)> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("sportsbook", book),
                ("league", self.league.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus(status.as_u16()));
        }

        let body: serde_json::Value = resp.json().await?;
        parse_feed(&body)
    }
}

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireFeed {
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: Option<serde_json::Value>,
    // Null and missing both mean "not live" / "no odds".
    live: Option<bool>,
    odds: Option<Vec<serde_json::Value>>,
    // Display-only context: an odd shape here never drops the event.
    teams: Option<serde_json::Value>,
    date: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireTeams {
    away: Option<WireTeam>,
    home: Option<WireTeam>,
}

#[derive(Debug, Deserialize)]
struct WireTeam {
    name: Option<String>,
}

impl WireTeams {
    /// `"Away @ Home"`, or `None` unless both names are present.
    fn matchup(self) -> Option<String> {
        let name = |t: Option<WireTeam>| {
            t.and_then(|t| t.name)
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
        };
        Some(format!("{} @ {}", name(self.away)?, name(self.home)?))
    }
}

/// Event-level fields copied onto every quote under it.
struct EventContext {
    id: Option<String>,
    live: bool,
    game: Option<String>,
    starts_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireOdd {
    market: String,
    price: RawPrice,
    selection: WireSelection,
    player: Option<WirePlayer>,
    links: Option<WireLinks>,
    main: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireSelection {
    name: Option<String>,
    side: Option<String>,
    line: Option<WireLine>,
}

#[derive(Debug, Deserialize)]
struct WirePlayer {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLinks {
    desktop: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireLine {
    Num(f64),
    Text(String),
}

enum Rejection {
    Shape,
    NoPlayer,
    NoSide,
    BadLine,
}

/// Validate a provider response. Only a missing `events` array fails the whole
/// response; every event and every quote is checked on its own and dropped on mismatch.
pub fn parse_feed(body: &serde_json::Value) -> Result<(Vec<RawBookQuote>, FeedStats)> {
    let feed = WireFeed::deserialize(body)
        .map_err(|e| AppError::Malformed(format!("provider response: {e}")))?;

    let mut quotes = Vec::new();
    let mut stats = FeedStats::default();

    for raw_event in &feed.events {
        let event = match WireEvent::deserialize(raw_event) {
            Ok(e) => e,
            Err(e) => {
                debug!("dropping malformed event: {e}");
                stats.dropped_events += 1;
                continue;
            }
        };
        stats.events += 1;

        let ctx = EventContext {
            id: event.id.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            live: event.live.unwrap_or(false),
            game: event
                .teams
                .and_then(|v| WireTeams::deserialize(v).ok())
                .and_then(WireTeams::matchup),
            starts_at: event
                .date
                .as_ref()
                .and_then(|d| d.as_str())
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        };

        for raw_odd in event.odds.iter().flatten() {
            match parse_quote(raw_odd, &ctx) {
                Ok(quote) => {
                    stats.quotes += 1;
                    quotes.push(quote);
                }
                Err(rejection) => {
                    stats.dropped_quotes += 1;
                    let reason = match rejection {
                        Rejection::Shape => "shape",
                        Rejection::NoPlayer => "no player",
                        Rejection::NoSide => "no side",
                        Rejection::BadLine => "bad line",
                    };
                    debug!(reason, "dropping malformed quote");
                }
            }
        }
    }

    Ok((quotes, stats))
}

fn parse_quote(
    v: &serde_json::Value,
    ctx: &EventContext,
) -> std::result::Result<RawBookQuote, Rejection> {
    let odd = WireOdd::deserialize(v).map_err(|_| Rejection::Shape)?;

    // Structured player first, selection name as fallback.
    let player = odd
        .player
        .and_then(|p| p.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| {
            odd.selection
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        })
        .ok_or(Rejection::NoPlayer)?;

    let side = odd
        .selection
        .side
        .as_deref()
        .and_then(Side::parse)
        .ok_or(Rejection::NoSide)?;

    let line = match odd.selection.line {
        None => None,
        Some(WireLine::Num(n)) => Some(Line::from_f64(n).ok_or(Rejection::BadLine)?),
        Some(WireLine::Text(s)) if s.trim().is_empty() => None,
        Some(WireLine::Text(s)) => {
            let n = s.trim().parse::<f64>().map_err(|_| Rejection::BadLine)?;
            Some(Line::from_f64(n).ok_or(Rejection::BadLine)?)
        }
    };

    let link = odd
        .links
        .and_then(|l| l.desktop)
        .filter(|l| !l.is_empty());

    Ok(RawBookQuote {
        event_id: ctx.id.clone(),
        game: ctx.game.clone(),
        starts_at: ctx.starts_at.clone(),
        live: ctx.live,
        market: odd.market.trim().to_string(),
        player,
        side,
        line,
        price: odd.price,
        link,
        main: odd.main,
    })
}
