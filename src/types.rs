use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::odds::RawPrice;

pub type BookId = String;

// ---------------------------------------------------------------------------
// Selection side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Over,
    Under,
    Yes,
    No,
    /// Any other selection label; has no logical opposite.
    Named(String),
}

impl Side {
    /// Case-insensitive parse; unknown labels are kept verbatim.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let side = match raw.to_ascii_lowercase().as_str() {
            "over" | "o" => Side::Over,
            "under" | "u" => Side::Under,
            "yes" => Side::Yes,
            "no" => Side::No,
            _ => Side::Named(raw.to_string()),
        };
        Some(side)
    }

    pub fn opposite(&self) -> Option<Side> {
        match self {
            Side::Over => Some(Side::Under),
            Side::Under => Some(Side::Over),
            Side::Yes => Some(Side::No),
            Side::No => Some(Side::Yes),
            Side::Named(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Side::Over => "Over",
            Side::Under => "Under",
            Side::Yes => "Yes",
            Side::No => "No",
            Side::Named(s) => s,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// Prop line stored as an integer key: `(line * 1_000).round() as i64`.
/// Keeps floats out of map keys while preserving three decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Line(i64);

impl Line {
    pub fn from_f64(line: f64) -> Option<Self> {
        if !line.is_finite() {
            return None;
        }
        Some(Line((line * 1_000.0).round() as i64))
    }

    pub fn value(self) -> f64 {
        self.0 as f64 / 1_000.0
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

// ---------------------------------------------------------------------------
// Upstream quote
// ---------------------------------------------------------------------------

/// One sportsbook's view of one outcome, as delivered by the provider.
/// Replaced wholesale whenever the book is re-fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBookQuote {
    pub event_id: Option<String>,
    /// `"Away @ Home"` when the provider names both teams.
    pub game: Option<String>,
    /// Scheduled start as sent by the provider.
    pub starts_at: Option<String>,
    /// True when the event is already in progress.
    pub live: bool,
    pub market: String,
    pub player: String,
    pub side: Side,
    pub line: Option<Line>,
    /// Unnormalized; the aggregator parses and drops malformed values.
    pub price: RawPrice,
    pub link: Option<String>,
    /// Primary (`true`) vs alternate (`false`) line, when the provider says.
    pub main: Option<bool>,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Composite identity of a prop within one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropKey {
    pub player: String,
    pub market: String,
    pub side: Side,
    pub line: Option<Line>,
}

impl PropKey {
    pub fn mirrored(&self) -> Option<PropKey> {
        Some(PropKey {
            player: self.player.clone(),
            market: self.market.clone(),
            side: self.side.opposite()?,
            line: self.line,
        })
    }
}

impl std::fmt::Display for PropKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}|{}|{} {}", self.player, self.market, self.side, line),
            None => write!(f, "{}|{}|{}", self.player, self.market, self.side),
        }
    }
}

/// One book's price for a prop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookPrice {
    /// Signed American odds, never zero.
    pub price: i32,
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<bool>,
}

pub type BookPrices = BTreeMap<BookId, BookPrice>;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedProp {
    pub key: PropKey,
    pub event_id: Option<String>,
    pub game: Option<String>,
    pub starts_at: Option<String>,
    pub books: BookPrices,
}

impl AggregatedProp {
    /// Number of distinct books pricing this prop in the current cycle.
    pub fn coverage(&self) -> u32 {
        self.books.len() as u32
    }
}

pub type PropTable = BTreeMap<PropKey, AggregatedProp>;

// ---------------------------------------------------------------------------
// Fair value
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalcMethod {
    #[serde(rename = "2-way")]
    TwoWay,
    #[serde(rename = "1-way")]
    OneWay,
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl CalcMethod {
    /// `none` and unknown tags mean the boundary could not compute the prop.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "2-way" => Some(CalcMethod::TwoWay),
            "1-way" => Some(CalcMethod::OneWay),
            "hybrid" => Some(CalcMethod::Hybrid),
            _ => None,
        }
    }
}

impl std::fmt::Display for CalcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CalcMethod::TwoWay => "2-way",
            CalcMethod::OneWay => "1-way",
            CalcMethod::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FairValueResult {
    /// Strictly inside (0, 1).
    pub fair_probability: f64,
    pub fair_odds: i32,
    /// Percent edge of the best book price over fair.
    pub edge_pct: f64,
    pub stake_fraction: f64,
    pub coverage: u32,
    pub method: CalcMethod,
}

// ---------------------------------------------------------------------------
// Published shape
// ---------------------------------------------------------------------------

/// The only entity exposed across the system boundary.
/// Fair-value fields serialize as `null` when not computed, never as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsRow {
    pub key: String,
    pub player: String,
    pub market: String,
    pub side: String,
    pub line: Option<f64>,
    pub event_id: Option<String>,
    pub game: Option<String>,
    pub starts_at: Option<String>,
    pub books: BookPrices,
    pub best_book: String,
    pub best_price: i32,
    pub fair_probability: Option<f64>,
    pub fair_odds: Option<i32>,
    pub edge_pct: Option<f64>,
    pub stake_fraction: Option<f64>,
    pub coverage: u32,
    pub calc_method: Option<CalcMethod>,
    pub updated_at: DateTime<Utc>,
}

/// Complete, immutable published state for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub stale: bool,
    pub rows: Vec<OddsRow>,
}

impl Snapshot {
    /// Served before the first cycle completes.
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self { cycle: 0, timestamp: at, stale: true, rows: Vec::new() }
    }
}
