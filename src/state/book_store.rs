use std::collections::BTreeMap;

use crate::types::{BookId, RawBookQuote};

/// Latest full quote set for one book.
#[derive(Debug, Clone)]
pub struct BookFeed {
    pub quotes: Vec<RawBookQuote>,
    /// False once a later fetch for this book failed. Unconfirmed feeds are kept
    /// for diagnostics but never aggregated.
    pub confirmed: bool,
}

/// Per-book quote store. Owned by the pipeline task; never shared.
///
/// Keyed by a `BTreeMap` so iteration order (and therefore aggregation) is deterministic.
#[derive(Debug, Default)]
pub struct BookStore {
    feeds: BTreeMap<BookId, BookFeed>,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a book's quote set after a successful fetch. Fetch times live
    /// in `HealthState`, which is what `/health` reports.
    pub fn replace(&mut self, book: &str, quotes: Vec<RawBookQuote>) {
        self.feeds.insert(book.to_string(), BookFeed { quotes, confirmed: true });
    }

    /// Record a failed fetch. The quotes stay in place untouched; the book drops
    /// out of aggregation until its next successful fetch.
    pub fn mark_failed(&mut self, book: &str) {
        if let Some(feed) = self.feeds.get_mut(book) {
            feed.confirmed = false;
        }
    }

    /// Books whose most recent fetch succeeded, in book-id order.
    pub fn confirmed_feeds(&self) -> impl Iterator<Item = (&str, &[RawBookQuote])> {
        self.feeds
            .iter()
            .filter(|(_, feed)| feed.confirmed)
            .map(|(book, feed)| (book.as_str(), feed.quotes.as_slice()))
    }

    pub fn get(&self, book: &str) -> Option<&BookFeed> {
        self.feeds.get(book)
    }

    pub fn confirmed_book_count(&self) -> usize {
        self.feeds.values().filter(|f| f.confirmed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::RawPrice;
    use crate::types::{Line, Side};

    fn quote(player: &str, price: &str) -> RawBookQuote {
        RawBookQuote {
            event_id: None,
            game: None,
            starts_at: None,
            live: false,
            market: "Player Points".to_string(),
            player: player.to_string(),
            side: Side::Over,
            line: Line::from_f64(20.5),
            price: RawPrice::Text(price.to_string()),
            link: None,
            main: None,
        }
    }

    #[test]
    fn replace_overwrites_whole_feed() {
        let mut store = BookStore::new();
        store.replace("draftkings", vec![quote("A", "+100"), quote("B", "+110")]);
        store.replace("draftkings", vec![quote("C", "-120")]);

        let feeds: Vec<_> = store.confirmed_feeds().collect();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].1.len(), 1);
        assert_eq!(feeds[0].1[0].player, "C");
    }

    #[test]
    fn failed_book_keeps_data_but_leaves_aggregation() {
        let mut store = BookStore::new();
        store.replace("draftkings", vec![quote("A", "+100")]);
        store.replace("fanduel", vec![quote("A", "+105")]);

        store.mark_failed("fanduel");

        let books: Vec<&str> = store.confirmed_feeds().map(|(b, _)| b).collect();
        assert_eq!(books, vec!["draftkings"]);
        assert_eq!(store.get("fanduel").map(|f| f.quotes.len()), Some(1));
        assert_eq!(store.confirmed_book_count(), 1);

        // Next success re-confirms.
        store.replace("fanduel", vec![quote("A", "+110")]);
        assert_eq!(store.confirmed_book_count(), 2);
    }

    #[test]
    fn failing_unknown_book_is_a_no_op() {
        let mut store = BookStore::new();
        store.mark_failed("circa");
        assert!(store.get("circa").is_none());
    }
}
