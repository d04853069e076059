use std::collections::HashMap;

use crate::types::{BookPrices, PropKey, PropTable};

/// Prop key → book prices of the mirrored selection in the same cycle.
pub type OppositeLookup = HashMap<PropKey, BookPrices>;

/// Pair every Over/Under and Yes/No prop with its mirror from the same table.
///
/// Built only from `props`; nothing from an earlier cycle is consulted. Props
/// without a mirror (or with a side that has no opposite) are simply absent.
pub fn build_opposite_lookup(props: &PropTable) -> OppositeLookup {
    props
        .keys()
        .filter_map(|key| {
            let mirror = key.mirrored()?;
            let opposite = props.get(&mirror)?;
            Some((key.clone(), opposite.books.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::types::{AggregatedProp, BookPrice, Line, Side};

    fn prop(player: &str, side: Side, line: Option<f64>, prices: &[(&str, i32)]) -> AggregatedProp {
        AggregatedProp {
            key: PropKey {
                player: player.to_string(),
                market: "Player Points".to_string(),
                side,
                line: line.and_then(Line::from_f64),
            },
            event_id: None,
            game: None,
            starts_at: None,
            books: prices
                .iter()
                .map(|(b, p)| (b.to_string(), BookPrice { price: *p, link: None, main: None }))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn table(props: Vec<AggregatedProp>) -> PropTable {
        props.into_iter().map(|p| (p.key.clone(), p)).collect()
    }

    #[test]
    fn pairs_over_and_under_symmetrically() {
        let over = prop("X", Side::Over, Some(24.5), &[("draftkings", -110)]);
        let under = prop("X", Side::Under, Some(24.5), &[("draftkings", -110), ("fanduel", -105)]);
        let props = table(vec![over.clone(), under.clone()]);

        let lookup = build_opposite_lookup(&props);
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup[&over.key], under.books);
        assert_eq!(lookup[&under.key], over.books);
    }

    #[test]
    fn pairs_yes_and_no() {
        let yes = prop("X", Side::Yes, None, &[("fanduel", 400)]);
        let no = prop("X", Side::No, None, &[("fanduel", -700)]);
        let props = table(vec![yes.clone(), no.clone()]);

        let lookup = build_opposite_lookup(&props);
        assert_eq!(lookup[&yes.key], no.books);
    }

    #[test]
    fn different_lines_do_not_pair() {
        let over = prop("X", Side::Over, Some(24.5), &[("draftkings", -110)]);
        let under = prop("X", Side::Under, Some(25.5), &[("draftkings", -110)]);
        let lookup = build_opposite_lookup(&table(vec![over, under]));
        assert!(lookup.is_empty());
    }

    #[test]
    fn missing_mirror_and_named_sides_are_absent() {
        let over = prop("X", Side::Over, Some(24.5), &[("draftkings", 105)]);
        let named = prop("X", Side::Named("Exactly 3".to_string()), None, &[("draftkings", 900)]);
        let lookup = build_opposite_lookup(&table(vec![over, named]));
        assert!(lookup.is_empty());
    }
}
