//! Cycle-duration histogram for the /stats/latency endpoint.
//! The pipeline records one sample per tick, from poll start to publish.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Microsecond samples, 1us to 10 minutes, 3 significant figures.
pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 600_000_000, 3).expect("valid histogram bounds");
        Self { inner: Mutex::new(histogram) }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 600_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let empty = LatencySummary {
            samples: 0,
            p50_ms: None,
            p95_ms: None,
            p99_ms: None,
            max_ms: None,
        };
        let Ok(h) = self.inner.lock() else {
            return empty;
        };
        if h.len() == 0 {
            return empty;
        }
        let ms = |us: u64| us as f64 / 1_000.0;
        LatencySummary {
            samples: h.len(),
            p50_ms: Some(ms(h.value_at_quantile(0.5))),
            p95_ms: Some(ms(h.value_at_quantile(0.95))),
            p99_ms: Some(ms(h.value_at_quantile(0.99))),
            max_ms: Some(ms(h.max())),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
