//! Client side of the external fair-value boundary.
//!
//! The formula lives behind the boundary. This module only owns the contract:
//! what is sent, how the answer maps back onto prop keys, and how "could not
//! compute" is kept distinct from a computed zero edge.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::odds::{market_key, probability_to_american};
use crate::opposite::OppositeLookup;
use crate::types::{BookPrices, CalcMethod, FairValueResult, PropKey, PropTable};

#[derive(Debug, Clone, PartialEq)]
pub enum FairValueOutcome {
    /// Results for the keys the boundary could compute. A missing key means
    /// unavailable for that prop only.
    Available(HashMap<PropKey, FairValueResult>),
    /// The whole request failed: timeout, non-2xx, transport or decode error.
    Unavailable(String),
}

impl FairValueOutcome {
    pub fn results(&self) -> Option<&HashMap<PropKey, FairValueResult>> {
        match self {
            FairValueOutcome::Available(results) => Some(results),
            FairValueOutcome::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, FairValueOutcome::Available(_))
    }
}

#[async_trait]
pub trait FairValueSource: Send + Sync {
    async fn evaluate(&self, props: &PropTable, opposites: &OppositeLookup) -> FairValueOutcome;
}

// ---------------------------------------------------------------------------
// Wire contract
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FairValueRequest<'a> {
    markets: Vec<MarketRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct MarketRequest<'a> {
    player: &'a str,
    market_key: String,
    line: Option<f64>,
    side: &'a str,
    book_odds: BTreeMap<&'a str, PriceOnly>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opposite_odds: Option<BTreeMap<&'a str, PriceOnly>>,
}

#[derive(Debug, Serialize)]
struct PriceOnly {
    price: i32,
}

/// Results keyed by the request index (`"0"`, `"1"`, ...).
#[derive(Debug, Deserialize)]
struct FairValueResponse {
    results: HashMap<String, serde_json::Value>,
}

/// Only the contract fields are read; anything else the boundary returns
/// (weights, confidence multipliers) is ignored and never republished.
#[derive(Debug, Deserialize)]
struct MarketResult {
    fair_probability: f64,
    fair_odds: Option<i32>,
    calc_type: String,
    edge_pct: f64,
    kelly_fraction: f64,
    coverage: Option<u32>,
}

fn price_map(books: &BookPrices) -> BTreeMap<&str, PriceOnly> {
    books
        .iter()
        .map(|(book, p)| (book.as_str(), PriceOnly { price: p.price }))
        .collect()
}

fn build_request<'a>(
    props: &'a PropTable,
    opposites: &'a OppositeLookup,
) -> (FairValueRequest<'a>, Vec<&'a PropKey>) {
    let mut keys = Vec::with_capacity(props.len());
    let markets = props
        .values()
        .map(|prop| {
            keys.push(&prop.key);
            MarketRequest {
                player: &prop.key.player,
                market_key: market_key(&prop.key.market),
                line: prop.key.line.map(|l| l.value()),
                side: prop.key.side.as_str(),
                book_odds: price_map(&prop.books),
                opposite_odds: opposites.get(&prop.key).map(price_map),
            }
        })
        .collect();
    (FairValueRequest { markets }, keys)
}

/// Convert one result; `None` when the boundary could not compute the prop.
fn convert_result(raw: serde_json::Value) -> Option<FairValueResult> {
    let r: MarketResult = serde_json::from_value(raw).ok()?;
    let method = CalcMethod::parse(&r.calc_type)?;
    if !(r.fair_probability > 0.0 && r.fair_probability < 1.0) {
        return None;
    }
    if !r.edge_pct.is_finite() || !r.kelly_fraction.is_finite() {
        return None;
    }
    let fair_odds = r
        .fair_odds
        .filter(|o| *o != 0)
        .or_else(|| probability_to_american(r.fair_probability))?;
    Some(FairValueResult {
        fair_probability: r.fair_probability,
        fair_odds,
        edge_pct: r.edge_pct,
        stake_fraction: r.kelly_fraction,
        coverage: r.coverage.unwrap_or(0),
        method,
    })
}

fn map_response(
    response: FairValueResponse,
    keys: &[&PropKey],
) -> HashMap<PropKey, FairValueResult> {
    let mut out = HashMap::with_capacity(response.results.len());
    for (idx, raw) in response.results {
        let Some(key) = idx.parse::<usize>().ok().and_then(|i| keys.get(i)) else {
            debug!(index = %idx, "fair-value result for unknown index ignored");
            continue;
        };
        if let Some(result) = convert_result(raw) {
            out.insert((*key).clone(), result);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct HttpFairValueClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpFairValueClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/fair-value", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    async fn request(&self, body: &FairValueRequest<'_>) -> Result<FairValueResponse> {
        let resp = self.client.post(&self.endpoint).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus(status.as_u16()));
        }
        Ok(resp.json::<FairValueResponse>().await?)
    }
}

#[async_trait]
impl FairValueSource for HttpFairValueClient {
    async fn evaluate(&self, props: &PropTable, opposites: &OppositeLookup) -> FairValueOutcome {
        if props.is_empty() {
            return FairValueOutcome::Available(HashMap::new());
        }

        let (body, keys) = build_request(props, opposites);
        let response = match tokio::time::timeout(self.timeout, self.request(&body)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!("fair-value request failed: {e}");
                return FairValueOutcome::Unavailable(e.to_string());
            }
            Err(_) => {
                let e = AppError::Timeout(self.timeout.as_millis() as u64);
                warn!("fair-value request failed: {e}");
                return FairValueOutcome::Unavailable(e.to_string());
            }
        };

        let results = map_response(response, &keys);
        if results.len() < keys.len() {
            debug!(
                requested = keys.len(),
                computed = results.len(),
                "fair value unavailable for {} props",
                keys.len() - results.len(),
            );
        }
        FairValueOutcome::Available(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    use crate::opposite::build_opposite_lookup;
    use crate::types::{AggregatedProp, BookPrice, Line, Side};

    fn prop(player: &str, side: Side, prices: &[(&str, i32)]) -> AggregatedProp {
        AggregatedProp {
            key: PropKey {
                player: player.to_string(),
                market: "Player Points".to_string(),
                side,
                line: Line::from_f64(24.5),
            },
            event_id: None,
            game: None,
            starts_at: None,
            books: prices
                .iter()
                .map(|(b, p)| (b.to_string(), BookPrice { price: *p, link: None, main: None }))
                .collect(),
        }
    }

    /// Over/Under pair for "A" plus a lone Over for "B", in key order: A-Over, A-Under, B-Over.
    fn sample_table() -> PropTable {
        [
            prop("A", Side::Over, &[("draftkings", 105), ("pinnacle", -102)]),
            prop("A", Side::Under, &[("draftkings", -125)]),
            prop("B", Side::Over, &[("fanduel", 300)]),
        ]
        .into_iter()
        .map(|p| (p.key.clone(), p))
        .collect()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn good(prob: f64, edge: f64, method: &str) -> Value {
        json!({
            "fair_probability": prob,
            "fair_odds": probability_to_american(prob),
            "calc_type": method,
            "edge_pct": edge,
            "kelly_fraction": 0.12,
            "coverage": 2,
            "confidence_multiplier": 0.35
        })
    }

    #[tokio::test]
    async fn maps_results_back_by_index_and_skips_uncomputed() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let router = Router::new()
            .route(
                "/v1/fair-value",
                post(|State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                    *seen.lock().unwrap() = Some(body);
                    Json(json!({"results": {
                        "0": good(0.49, 2.5, "2-way"),
                        "1": {"fair_probability": 0.0, "fair_odds": 0, "calc_type": "none",
                              "edge_pct": 0.0, "kelly_fraction": 0.0, "coverage": 0},
                        "2": good(0.22, 0.0, "1-way"),
                        "99": good(0.5, 1.0, "1-way")
                    }}))
                }),
            )
            .with_state(Arc::clone(&seen));
        let base = serve(router).await;

        let props = sample_table();
        let opposites = build_opposite_lookup(&props);
        let client = HttpFairValueClient::new(&base, Duration::from_secs(2)).unwrap();

        let outcome = client.evaluate(&props, &opposites).await;
        let results = outcome.results().expect("boundary answered");
        let keys: Vec<&PropKey> = props.keys().collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[keys[0]].method, CalcMethod::TwoWay);
        assert!(!results.contains_key(keys[1]), "calc_type none is unavailable, not zero");
        assert_eq!(results[keys[2]].edge_pct, 0.0, "a computed zero edge survives");

        let body = seen.lock().unwrap().clone().unwrap();
        let markets = body["markets"].as_array().unwrap();
        assert_eq!(markets.len(), 3);
        assert_eq!(markets[0]["market_key"], "player_points");
        assert_eq!(markets[0]["line"], 24.5);
        assert_eq!(markets[0]["side"], "Over");
        assert_eq!(markets[0]["book_odds"]["pinnacle"]["price"], -102);
        assert_eq!(markets[0]["opposite_odds"]["draftkings"]["price"], -125);
        assert!(markets[2].get("opposite_odds").is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let router = Router::new().route(
            "/v1/fair-value",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(router).await;
        let client = HttpFairValueClient::new(&base, Duration::from_secs(2)).unwrap();

        let outcome = client.evaluate(&sample_table(), &OppositeLookup::new()).await;
        assert!(matches!(outcome, FairValueOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn slow_boundary_times_out_as_unavailable() {
        let router = Router::new().route(
            "/v1/fair-value",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"results": {}}))
            }),
        );
        let base = serve(router).await;
        let client = HttpFairValueClient::new(&base, Duration::from_millis(200)).unwrap();

        let outcome = client.evaluate(&sample_table(), &OppositeLookup::new()).await;
        assert!(!outcome.is_available());
    }

    #[tokio::test]
    async fn garbage_body_is_unavailable() {
        let router = Router::new().route("/v1/fair-value", post(|| async { "not json" }));
        let base = serve(router).await;
        let client = HttpFairValueClient::new(&base, Duration::from_secs(2)).unwrap();

        let outcome = client.evaluate(&sample_table(), &OppositeLookup::new()).await;
        assert!(!outcome.is_available());
    }

    #[tokio::test]
    async fn empty_table_skips_the_request() {
        // Nothing listens on port 9; an attempted request would fail.
        let client = HttpFairValueClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let outcome = client.evaluate(&PropTable::new(), &OppositeLookup::new()).await;
        assert_eq!(outcome, FairValueOutcome::Available(HashMap::new()));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        assert!(convert_result(good(1.2, 3.0, "1-way")).is_none());
        assert!(convert_result(json!({"calc_type": "1-way"})).is_none());
        let ok = convert_result(good(0.25, -4.0, "hybrid")).unwrap();
        assert_eq!(ok.fair_odds, 300);
        assert_eq!(ok.method, CalcMethod::Hybrid);
    }
}
