//! American-odds normalization and conversions.
//!
//! Valid American odds are `>= +100` or `<= -100`, so plain integer ordering
//! matches payout ordering: a higher value always pays more.

use serde::Deserialize;

/// Price exactly as the provider sent it: `"+150"`, `"-110"`, `150`, or `150.0`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPrice {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Parse an American-odds string. Leading `+` is optional for positive prices.
/// Zero, `|odds| < 100`, and anything non-numeric return `None`.
pub fn parse_american_odds(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let digits = match raw.strip_prefix('+') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        Some(_) => return None,
        None => raw,
    };
    let odds = digits.parse::<i32>().ok()?;
    validate(odds)
}

/// Normalize any provider price shape to signed American odds.
pub fn normalize_price(price: &RawPrice) -> Option<i32> {
    match price {
        RawPrice::Int(v) => i32::try_from(*v).ok().and_then(validate),
        RawPrice::Float(v) if v.is_finite() && v.fract() == 0.0 => {
            if v.abs() > f64::from(i32::MAX) {
                return None;
            }
            validate(*v as i32)
        }
        RawPrice::Float(_) => None,
        RawPrice::Text(s) => parse_american_odds(s),
    }
}

fn validate(odds: i32) -> Option<i32> {
    if odds >= 100 || odds <= -100 {
        Some(odds)
    } else {
        None
    }
}

/// Fair American price for a probability; `None` outside (0, 1).
pub fn probability_to_american(prob: f64) -> Option<i32> {
    if !(prob > 0.0 && prob < 1.0) {
        return None;
    }
    let odds = if prob >= 0.5 {
        -100.0 * prob / (1.0 - prob)
    } else {
        100.0 * (1.0 - prob) / prob
    };
    Some(odds.round() as i32)
}

pub fn format_american(odds: i32) -> String {
    if odds > 0 {
        format!("+{odds}")
    } else {
        odds.to_string()
    }
}

/// Market name as the fair-value boundary keys it: `"Player Points + Assists"` → `"player_points__assists"`.
pub fn market_key(market: &str) -> String {
    market.to_lowercase().replace(' ', "_").replace('+', "")
}
