//! Warehouse round-trip latency, summarised for `/stats/latency`.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Slowest round trip kept at full precision: the warehouse HTTP timeout, with headroom.
const MAX_TRACKED_MS: u64 = 10 * 60 * 1000;

/// Percentiles in milliseconds; all `None` until the first cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub sample_count: u64,
}

/// Microsecond histogram of warehouse fetches. Cache hits are never recorded.
pub struct RoundTripLatency {
    histogram: Mutex<Histogram<u64>>,
}

impl RoundTripLatency {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKED_MS * 1000, 3)
            .expect("static histogram bounds");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Slower-than-tracked trips are clamped to the top bucket.
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX).max(1);
        if let Ok(mut h) = self.histogram.lock() {
            let _ = h.saturating_record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.histogram.lock() else {
            return LatencySummary::empty();
        };
        if h.len() == 0 {
            return LatencySummary::empty();
        }
        let ms = |q: f64| Some(h.value_at_quantile(q) as f64 / 1000.0);
        LatencySummary {
            p50_ms: ms(0.50),
            p95_ms: ms(0.95),
            p99_ms: ms(0.99),
            sample_count: h.len(),
        }
    }
}

impl LatencySummary {
    fn empty() -> Self {
        Self {
            p50_ms: None,
            p95_ms: None,
            p99_ms: None,
            sample_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_fetches_no_percentiles() {
        let latency = RoundTripLatency::new();
        assert_eq!(latency.summary(), LatencySummary::empty());
    }

    #[test]
    fn summary_reports_milliseconds() {
        let latency = RoundTripLatency::new();
        for ms in 1..=100u64 {
            latency.record(Duration::from_millis(ms));
        }
        let s = latency.summary();
        assert_eq!(s.sample_count, 100);
        let p50 = s.p50_ms.unwrap();
        assert!((49.0..=51.0).contains(&p50), "p50={p50}");
        assert!(s.p95_ms.unwrap() <= s.p99_ms.unwrap());
    }

    #[test]
    fn timeouts_land_in_the_top_bucket() {
        let latency = RoundTripLatency::new();
        latency.record(Duration::from_secs(3600));
        latency.record(Duration::ZERO);
        let s = latency.summary();
        assert_eq!(s.sample_count, 2);
        assert!(s.p99_ms.unwrap() >= 599_000.0, "{s:?}");
    }
}
