use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::attack::Outcome;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    #[serde(with = "duration_ns")]
    pub p50: Duration,
    #[serde(with = "duration_ns")]
    pub p95: Duration,
    #[serde(with = "duration_ns")]
    pub p99: Duration,
    #[serde(with = "duration_ns")]
    pub min: Duration,
    #[serde(with = "duration_ns")]
    pub max: Duration,
    #[serde(with = "duration_ns")]
    pub mean: Duration,
}

/// Final statistics for one attack. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub label: String,
    pub requests: u64,
    /// Requests per second over `duration`.
    pub throughput: f64,
    pub success_ratio: f64,
    /// From the first dispatch to the last completion.
    #[serde(with = "duration_ns")]
    pub duration: Duration,
    /// Status code -> count. `"0"` counts requests that got no HTTP response.
    pub status_codes: BTreeMap<String, u64>,
    /// Transport error kind -> count.
    pub errors: BTreeMap<String, u64>,
    pub latencies: Option<LatencySummary>,
    pub bytes_in_mean: f64,
    pub bytes_out_mean: f64,
    pub bytes_in_total: u64,
    pub bytes_out_total: u64,
}

#[derive(Debug, Default)]
struct Window {
    first_dispatch: Option<Instant>,
    last_completion: Option<Instant>,
}

/// Folds outcomes of one attack into a [`MetricsSnapshot`].
///
/// `record` may be called from any number of request tasks at once.
#[derive(Debug)]
pub struct Aggregator {
    label: String,
    expected: u64,

    observed: AtomicU64,
    successes: AtomicU64,
    bytes_in_total: AtomicU64,
    bytes_out_total: AtomicU64,

    latencies: Mutex<Vec<Duration>>,
    status_codes: Mutex<BTreeMap<u16, u64>>,
    errors: Mutex<BTreeMap<String, u64>>,
    window: Mutex<Window>,

    snapshot: OnceLock<MetricsSnapshot>,
}

impl Aggregator {
    pub fn new(label: impl Into<String>, expected: u64) -> Self {
        Self {
            label: label.into(),
            expected,
            observed: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            bytes_in_total: AtomicU64::new(0),
            bytes_out_total: AtomicU64::new(0),
            latencies: Mutex::new(Vec::with_capacity(usize::try_from(expected).unwrap_or(0))),
            status_codes: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(BTreeMap::new()),
            window: Mutex::new(Window::default()),
            snapshot: OnceLock::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::Acquire)
    }

    /// Note a dispatch time; the earliest one opens the measurement window.
    pub fn mark_dispatch(&self, at: Instant) {
        let mut window = self.window.lock();
        if window.first_dispatch.is_none_or(|first| at < first) {
            window.first_dispatch = Some(at);
        }
    }

    pub fn record(&self, outcome: Outcome) {
        self.mark_dispatch(outcome.started);

        if let Some(latency) = outcome.latency {
            let completed = outcome.started + latency;
            {
                let mut window = self.window.lock();
                if window.last_completion.is_none_or(|last| completed > last) {
                    window.last_completion = Some(completed);
                }
            }
            self.latencies.lock().push(latency);
        }

        if (200..300).contains(&outcome.status_code) {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
        *self.status_codes.lock().entry(outcome.status_code).or_insert(0) += 1;
        if let Some(kind) = outcome.error {
            *self.errors.lock().entry(kind.to_string()).or_insert(0) += 1;
        }

        self.bytes_in_total
            .fetch_add(outcome.bytes_in, Ordering::Relaxed);
        self.bytes_out_total
            .fetch_add(outcome.bytes_out, Ordering::Relaxed);

        // Last, so `observed() == expected` implies every field above is in.
        self.observed.fetch_add(1, Ordering::AcqRel);
    }

    /// Compute the snapshot. Only valid once every expected outcome is recorded;
    /// later calls return the same value.
    pub fn finalize(&self) -> Result<MetricsSnapshot> {
        if let Some(snapshot) = self.snapshot.get() {
            return Ok(snapshot.clone());
        }

        let observed = self.observed();
        if observed < self.expected {
            return Err(Error::IncompleteOutcomes {
                label: self.label.clone(),
                observed,
                expected: self.expected,
            });
        }

        Ok(self.snapshot.get_or_init(|| self.compute(observed)).clone())
    }

    fn compute(&self, requests: u64) -> MetricsSnapshot {
        let mut sorted = self.latencies.lock().clone();
        sorted.sort_unstable();

        let duration = {
            let window = self.window.lock();
            match (window.first_dispatch, window.last_completion) {
                (Some(first), Some(last)) => last.saturating_duration_since(first),
                _ => Duration::ZERO,
            }
        };

        let successes = self.successes.load(Ordering::Relaxed);
        let throughput = if duration.is_zero() {
            0.0
        } else {
            requests as f64 / duration.as_secs_f64()
        };
        let success_ratio = ratio(successes, requests);

        let bytes_in_total = self.bytes_in_total.load(Ordering::Relaxed);
        let bytes_out_total = self.bytes_out_total.load(Ordering::Relaxed);

        let status_codes = self
            .status_codes
            .lock()
            .iter()
            .map(|(code, n)| (code.to_string(), *n))
            .collect();

        MetricsSnapshot {
            label: self.label.clone(),
            requests,
            throughput,
            success_ratio,
            duration,
            status_codes,
            errors: self.errors.lock().clone(),
            latencies: summarize(&sorted),
            bytes_in_mean: ratio(bytes_in_total, requests),
            bytes_out_mean: ratio(bytes_out_total, requests),
            bytes_in_total,
            bytes_out_total,
        }
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 { 0.0 } else { n as f64 / d as f64 }
}

fn summarize(sorted: &[Duration]) -> Option<LatencySummary> {
    let (&min, &max) = (sorted.first()?, sorted.last()?);
    let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
    let mean_ns = total / sorted.len() as u128;

    Some(LatencySummary {
        p50: percentile(sorted, 0.50),
        p95: percentile(sorted, 0.95),
        p99: percentile(sorted, 0.99),
        min,
        max,
        mean: Duration::from_nanos(u64::try_from(mean_ns).unwrap_or(u64::MAX)),
    })
}

/// Nearest-rank percentile of a non-empty sorted slice.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let n = sorted.len();
    let rank = (p * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

mod duration_ns {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}
