use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

// We record latencies in microseconds.
const LATENCY_SIGFIG: u8 = 3;
// History fetches shell out to VCS tools; 10 minutes bounds even pathological repositories.
// Values above this are clamped.
const MAX_LATENCY_US: u64 = 10 * 60 * 1_000_000;

/// Thread-safe runtime metrics registry (named counters + latency histograms).
///
/// Recording a metric is a single mutex acquisition and no allocations on the hot path after a
/// name is first seen.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    counters: HashMap<String, u64>,
    latencies: HashMap<String, Histogram<u64>>,
}

fn new_latency_histogram() -> Histogram<u64> {
    static HISTOGRAM_BOUNDS_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    Histogram::<u64>::new_with_bounds(1, MAX_LATENCY_US, LATENCY_SIGFIG).unwrap_or_else(|err| {
        if HISTOGRAM_BOUNDS_ERROR_LOGGED.set(()).is_ok() {
            tracing::debug!(
                target = "sift.metrics",
                error = %err,
                "failed to construct bounded latency histogram; falling back to unbounded histogram"
            );
        }
        // hdrhistogram only errors for invalid bounds/precision.
        Histogram::<u64>::new(LATENCY_SIGFIG).expect("histogram")
    })
}

impl MetricsRegistry {
    /// Increment the counter `name` by one.
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Increment the counter `name` by `delta`.
    pub fn add(&self, name: &str, delta: u64) {
        let mut inner = self.inner.lock();
        match inner.counters.get_mut(name) {
            Some(count) => *count = count.saturating_add(delta),
            None => {
                inner.counters.insert(name.to_owned(), delta);
            }
        }
    }

    /// Record one latency sample for `name`.
    pub fn record_latency(&self, name: &str, duration: Duration) {
        static HISTOGRAM_RECORD_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        let micros = duration.as_micros().min(u128::from(MAX_LATENCY_US)) as u64;
        let micros = micros.max(1);

        let mut inner = self.inner.lock();
        let hist = inner
            .latencies
            .entry(name.to_owned())
            .or_insert_with(new_latency_histogram);
        if let Err(err) = hist.record(micros) {
            if HISTOGRAM_RECORD_ERROR_LOGGED.set(()).is_ok() {
                tracing::debug!(
                    target = "sift.metrics",
                    name,
                    micros,
                    error = %err,
                    "failed to record latency sample"
                );
            }
        }
    }

    /// Current value of counter `name` (zero when never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Reset all recorded metrics.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counters.clear();
        inner.latencies.clear();
    }

    /// Create a snapshot of all recorded metrics suitable for debug export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();

        let counters = inner
            .counters
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        let latencies = inner
            .latencies
            .iter()
            .map(|(name, hist)| (name.clone(), latency_summary(hist)))
            .collect();

        MetricsSnapshot {
            counters,
            latencies,
        }
    }
}

fn latency_summary(hist: &Histogram<u64>) -> LatencySummary {
    if hist.is_empty() {
        return LatencySummary {
            count: 0,
            p50_us: 0,
            p95_us: 0,
            max_us: 0,
        };
    }

    LatencySummary {
        count: hist.len(),
        p50_us: hist.value_at_quantile(0.50),
        p95_us: hist.value_at_quantile(0.95),
        max_us: hist.max(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub count: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}
