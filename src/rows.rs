use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::fair_value::FairValueOutcome;
use crate::types::{AggregatedProp, BookPrices, OddsRow};

/// Highest price among retail books; falls back to every book when only
/// reference books quote the prop. Ties go to the smallest book id.
pub fn best_price<'a>(books: &'a BookPrices, sharp_books: &[String]) -> Option<(&'a str, i32)> {
    let is_sharp = |book: &str| sharp_books.iter().any(|s| s.eq_ignore_ascii_case(book));

    let pick = |retail_only: bool| {
        books
            .iter()
            .filter(|(book, _)| !retail_only || !is_sharp(book.as_str()))
            // BTreeMap iterates in book-id order; keep the first of equal prices.
            .fold(None::<(&str, i32)>, |best, (book, p)| match best {
                Some((_, price)) if price >= p.price => best,
                _ => Some((book.as_str(), p.price)),
            })
    };

    pick(true).or_else(|| pick(false))
}

/// Join the aggregated table with this cycle's fair-value outcome.
pub fn build_rows<'a, I>(
    props: I,
    fair_value: &FairValueOutcome,
    sharp_books: &[String],
    now: DateTime<Utc>,
) -> Vec<OddsRow>
where
    I: IntoIterator<Item = &'a AggregatedProp>,
{
    let results = fair_value.results();

    let mut rows: Vec<OddsRow> = props
        .into_iter()
        .filter_map(|prop| {
            // Aggregated props always carry at least one book.
            let (best_book, best) = best_price(&prop.books, sharp_books)?;
            let fv = results.and_then(|r| r.get(&prop.key));

            Some(OddsRow {
                key: prop.key.to_string(),
                player: prop.key.player.clone(),
                market: prop.key.market.clone(),
                side: prop.key.side.to_string(),
                line: prop.key.line.map(|l| l.value()),
                event_id: prop.event_id.clone(),
                game: prop.game.clone(),
                starts_at: prop.starts_at.clone(),
                books: prop.books.clone(),
                best_book: best_book.to_string(),
                best_price: best,
                fair_probability: fv.map(|f| f.fair_probability),
                fair_odds: fv.map(|f| f.fair_odds),
                edge_pct: fv.map(|f| f.edge_pct),
                stake_fraction: fv.map(|f| f.stake_fraction),
                coverage: fv
                    .map(|f| f.coverage)
                    .filter(|c| *c > 0)
                    .unwrap_or_else(|| prop.coverage()),
                calc_method: fv.map(|f| f.method),
                updated_at: now,
            })
        })
        .collect();

    rows.sort_by(compare_rows);
    rows
}

/// Edge descending, rows without an edge last, then key ascending.
fn compare_rows(a: &OddsRow, b: &OddsRow) -> Ordering {
    match (a.edge_pct, b.edge_pct) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.key.cmp(&b.key))
}
