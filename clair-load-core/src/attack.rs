use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clair_load_http::{HttpClient, HttpRequest, HttpTransportErrorKind};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument as _;

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::limiter::DispatchLimiter;
use crate::stats::{Aggregator, MetricsSnapshot};
use crate::targets::TargetSet;

/// Upper bound on requests awaiting a response at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

#[derive(Debug, Clone)]
pub struct AttackConfig {
    rate: NonZeroU32,
    timeout: Duration,
    max_in_flight: usize,
    label: String,
}

impl AttackConfig {
    pub fn new(rate: u32, timeout: Duration, label: impl Into<String>) -> Result<Self> {
        let rate = NonZeroU32::new(rate).ok_or(Error::InvalidRate)?;
        if timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }
        Ok(Self {
            rate,
            timeout,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            label: label.into(),
        })
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Result<Self> {
        if max_in_flight == 0 {
            return Err(Error::InvalidMaxInFlight);
        }
        self.max_in_flight = max_in_flight;
        Ok(self)
    }

    /// Same pacing, different operation.
    #[must_use]
    pub fn relabel(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self.clone()
        }
    }

    pub fn rate(&self) -> NonZeroU32 {
        self.rate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub started: Instant,
    /// `None` when the request was rejected before reaching the network.
    pub latency: Option<Duration>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// `0` when no HTTP response was received.
    pub status_code: u16,
    pub error: Option<HttpTransportErrorKind>,
}

/// Replays a [`TargetSet`] at a constant request rate.
#[derive(Debug, Clone)]
pub struct Attacker {
    client: HttpClient,
    cancel: CancelSignal,
}

impl Attacker {
    #[must_use]
    pub fn new(client: HttpClient, cancel: CancelSignal) -> Self {
        Self { client, cancel }
    }

    /// Send every target once, paced at `config.rate()`, and return the statistics
    /// once every dispatched request has produced an outcome.
    ///
    /// Individual request failures are counted, not returned.
    pub async fn attack(&self, config: &AttackConfig, targets: &TargetSet) -> Result<MetricsSnapshot> {
        let span = tracing::info_span!("attack", label = config.label());
        self.attack_inner(config, targets).instrument(span).await
    }

    async fn attack_inner(&self, config: &AttackConfig, targets: &TargetSet) -> Result<MetricsSnapshot> {
        let total = targets.len() as u64;
        let agg = Arc::new(Aggregator::new(config.label(), total));
        let limiter = DispatchLimiter::new(config.rate());
        let permits = Arc::new(Semaphore::new(config.max_in_flight()));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0u64;

        tracing::info!(
            targets = total,
            rate = config.rate().get(),
            timeout = %humantime::format_duration(config.timeout()),
            "attack started"
        );

        for target in targets {
            if self.cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = limiter.acquire() => {}
            }

            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let started = Instant::now();
            agg.mark_dispatch(started);

            let request = target.to_http_request(config.timeout());
            let client = self.client.clone();
            let agg = Arc::clone(&agg);
            tasks.spawn(
                async move {
                    let outcome = execute(&client, request, started).await;
                    agg.record(outcome);
                    drop(permit);
                }
                .in_current_span(),
            );
            dispatched += 1;

            while let Some(done) = tasks.try_join_next() {
                done?;
            }
        }

        while let Some(done) = tasks.join_next().await {
            done?;
        }

        if dispatched < total {
            tracing::warn!(dispatched, total, "attack cancelled");
            return Err(Error::Cancelled {
                label: config.label().to_string(),
                dispatched,
                total,
            });
        }

        let observed = agg.observed();
        if observed != dispatched {
            return Err(Error::IncompleteOutcomes {
                label: config.label().to_string(),
                observed,
                expected: dispatched,
            });
        }

        let snapshot = agg.finalize()?;
        tracing::info!(
            requests = snapshot.requests,
            success_ratio = snapshot.success_ratio,
            duration = ?snapshot.duration,
            "attack finished"
        );
        Ok(snapshot)
    }
}

async fn execute(client: &HttpClient, request: HttpRequest, started: Instant) -> Outcome {
    let bytes_out_estimate = clair_load_http::estimate_http_request_bytes(&request).unwrap_or(0);
    let url = request.url.clone();

    match client.request(request).await {
        Ok(res) => Outcome {
            started,
            latency: Some(started.elapsed()),
            bytes_in: res.bytes_received,
            bytes_out: res.bytes_sent,
            status_code: res.status,
            error: None,
        },
        Err(err) => {
            let kind = err.transport_error_kind();
            tracing::debug!(%url, error = %err, kind = %kind, "request failed");

            let preflight = kind.is_preflight();
            Outcome {
                started,
                latency: (!preflight).then(|| started.elapsed()),
                bytes_in: 0,
                bytes_out: if preflight { 0 } else { bytes_out_estimate },
                status_code: 0,
                error: Some(kind),
            }
        }
    }
}
