use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::odds::normalize_price;
use crate::types::{AggregatedProp, BookPrice, Line, PropKey, PropTable, RawBookQuote, Side};

/// Counters for one aggregation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregationStats {
    pub books: usize,
    pub quotes_seen: usize,
    pub out_of_scope: usize,
    pub live_skipped: usize,
    pub bad_price: usize,
    pub props: usize,
    /// Player strings that look like the same person but were kept apart.
    pub divergent_names: Vec<DivergentNames>,
}

/// Distinct player strings sharing an alias within one market/side/line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergentNames {
    pub market: String,
    pub side: Side,
    pub line: Option<Line>,
    pub names: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Aggregation {
    pub props: PropTable,
    pub stats: AggregationStats,
}

/// Player-level proposition markets only.
pub fn is_in_scope(market: &str) -> bool {
    market.contains("Player") || market.contains("First Basket")
}

/// Build a fresh prop table from every book's latest confirmed quotes.
///
/// Nothing carries over between calls: a book contributes to a prop only if
/// its current feed still quotes it. Same key from the same book is last write wins.
pub fn aggregate<'a, I>(feeds: I) -> Aggregation
where
    I: IntoIterator<Item = (&'a str, &'a [RawBookQuote])>,
{
    let mut props = PropTable::new();
    let mut stats = AggregationStats::default();

    for (book, quotes) in feeds {
        stats.books += 1;
        let book = book.to_lowercase();

        for quote in quotes {
            stats.quotes_seen += 1;

            if quote.live {
                stats.live_skipped += 1;
                continue;
            }
            if !is_in_scope(&quote.market) {
                stats.out_of_scope += 1;
                continue;
            }
            let Some(price) = normalize_price(&quote.price) else {
                stats.bad_price += 1;
                debug!(book = %book, player = %quote.player, "dropping quote with unusable price");
                continue;
            };

            let key = PropKey {
                player: quote.player.clone(),
                market: quote.market.clone(),
                side: quote.side.clone(),
                line: quote.line,
            };

            let prop = props.entry(key.clone()).or_insert_with(|| AggregatedProp {
                key,
                event_id: quote.event_id.clone(),
                game: quote.game.clone(),
                starts_at: quote.starts_at.clone(),
                books: BTreeMap::new(),
            });
            // First book that knows the event fills it in.
            if prop.event_id.is_none() {
                prop.event_id = quote.event_id.clone();
            }
            if prop.game.is_none() {
                prop.game = quote.game.clone();
            }
            if prop.starts_at.is_none() {
                prop.starts_at = quote.starts_at.clone();
            }
            prop.books.insert(
                book.clone(),
                BookPrice { price, link: quote.link.clone(), main: quote.main },
            );
        }
    }

    stats.props = props.len();
    stats.divergent_names = find_divergent_names(&props);
    for d in &stats.divergent_names {
        warn!(
            market = %d.market,
            side = %d.side,
            names = ?d.names,
            "player names look alike but are aggregated separately"
        );
    }

    Aggregation { props, stats }
}

/// First initial + surname, lowercased, punctuation and generational suffixes stripped.
/// `"J. Brunson"` and `"Jalen Brunson"` both become `"j brunson"`.
pub fn player_alias(name: &str) -> String {
    const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

    let tokens: Vec<String> = name
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '\'')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    let mut end = tokens.len();
    while end > 1 && SUFFIXES.contains(&tokens[end - 1].as_str()) {
        end -= 1;
    }
    let tokens = &tokens[..end];

    match tokens {
        [] => String::new(),
        [only] => only.clone(),
        [first, .., last] => {
            let initial: String = first.chars().take(1).collect();
            format!("{initial} {last}")
        }
    }
}

fn find_divergent_names(props: &PropTable) -> Vec<DivergentNames> {
    let mut groups: BTreeMap<(&str, &Side, Option<Line>, String), BTreeSet<&str>> = BTreeMap::new();
    for key in props.keys() {
        groups
            .entry((key.market.as_str(), &key.side, key.line, player_alias(&key.player)))
            .or_default()
            .insert(key.player.as_str());
    }

    groups
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .map(|((market, side, line, _), names)| DivergentNames {
            market: market.to_string(),
            side: side.clone(),
            line,
            names: names.into_iter().map(str::to_string).collect(),
        })
        .collect()
}
