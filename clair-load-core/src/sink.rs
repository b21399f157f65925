//! Publishing per-operation results to an external store.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use clair_load_http::{HttpClient, HttpRequest};
use serde::Serialize;

use crate::stats::MetricsSnapshot;

pub const WORKLOAD: &str = "clair-load-test";

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("could not reach result store: {0}")]
    Connection(#[from] clair_load_http::Error),

    #[error("result store rejected the document with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Run-wide context attached to every published snapshot.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: String,
    pub host: String,
    pub rps: u32,
    pub operation_label: String,
    pub timestamp: SystemTime,
    pub request_timeout: Duration,
}

impl RunMetadata {
    /// The same run context, stamped for another operation.
    #[must_use]
    pub fn for_operation(&self, label: &str) -> Self {
        Self {
            operation_label: label.to_string(),
            timestamp: SystemTime::now(),
            ..self.clone()
        }
    }
}

pub trait ResultSink: Send + Sync {
    fn publish(
        &self,
        snapshot: &MetricsSnapshot,
        meta: &RunMetadata,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Indexed document layout. Latencies are integer nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub workload: String,
    pub endpoint: String,
    pub request_timeout: u64,
    pub targets: String,
    pub hostname: String,
    pub rps: u32,
    pub throughput: f64,
    pub status_codes: BTreeMap<String, u64>,
    pub requests: u64,
    pub p99_latency: u64,
    pub p95_latency: u64,
    pub max_latency: u64,
    pub min_latency: u64,
    pub req_latency: u64,
    pub timestamp: String,
    pub bytes_in: f64,
    pub bytes_out: f64,
    pub run_id: String,
}

impl Document {
    pub fn new(snapshot: &MetricsSnapshot, meta: &RunMetadata, hostname: &str) -> Self {
        let ns = |d: Duration| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        let lat = snapshot.latencies.as_ref();

        Self {
            workload: WORKLOAD.to_string(),
            endpoint: meta.host.clone(),
            request_timeout: meta.request_timeout.as_secs(),
            targets: meta.operation_label.clone(),
            hostname: hostname.to_string(),
            rps: meta.rps,
            throughput: snapshot.throughput,
            status_codes: snapshot.status_codes.clone(),
            requests: snapshot.requests,
            p99_latency: lat.map_or(0, |l| ns(l.p99)),
            p95_latency: lat.map_or(0, |l| ns(l.p95)),
            max_latency: lat.map_or(0, |l| ns(l.max)),
            min_latency: lat.map_or(0, |l| ns(l.min)),
            req_latency: lat.map_or(0, |l| ns(l.mean)),
            timestamp: humantime::format_rfc3339_seconds(meta.timestamp).to_string(),
            bytes_in: snapshot.bytes_in_mean,
            bytes_out: snapshot.bytes_out_mean,
            run_id: meta.run_id.clone(),
        }
    }
}

/// Indexes one document per operation via `POST {host}:{port}/{index}/_doc`.
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: HttpClient,
    url: String,
    hostname: String,
}

impl ElasticsearchSink {
    pub fn new(client: HttpClient, host: &str, port: &str, index: &str, hostname: impl Into<String>) -> Self {
        let host = host.trim_end_matches('/');
        let host = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Self {
            client,
            url: format!("{host}:{port}/{index}/_doc"),
            hostname: hostname.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ResultSink for ElasticsearchSink {
    async fn publish(&self, snapshot: &MetricsSnapshot, meta: &RunMetadata) -> Result<(), SinkError> {
        let doc = Document::new(snapshot, meta, &self.hostname);
        let body = Bytes::from(serde_json::to_vec(&doc)?);

        let req = HttpRequest::post(self.url.clone(), body)
            .with_header("Content-Type", "application/json")
            .with_timeout(PUBLISH_TIMEOUT);
        let res = self.client.request(req).await?;

        if !res.is_success() {
            return Err(SinkError::Rejected {
                status: res.status,
                body: res.body_utf8().unwrap_or_default().to_string(),
            });
        }

        tracing::info!(url = %self.url, label = %meta.operation_label, "results indexed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LatencySummary;
    use std::time::UNIX_EPOCH;

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            label: "get_index_report".to_string(),
            requests: 4,
            throughput: 2.0,
            success_ratio: 1.0,
            duration: Duration::from_secs(2),
            status_codes: BTreeMap::from([("200".to_string(), 4)]),
            errors: BTreeMap::new(),
            latencies: Some(LatencySummary {
                p50: Duration::from_millis(2),
                p95: Duration::from_millis(3),
                p99: Duration::from_millis(4),
                min: Duration::from_millis(1),
                max: Duration::from_millis(4),
                mean: Duration::from_micros(2500),
            }),
            bytes_in_mean: 120.0,
            bytes_out_mean: 80.0,
            bytes_in_total: 480,
            bytes_out_total: 320,
        }
    }

    fn meta() -> RunMetadata {
        RunMetadata {
            run_id: "run-1".to_string(),
            host: "http://clair:6060".to_string(),
            rps: 10,
            operation_label: "get_index_report".to_string(),
            timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn document_uses_indexed_field_names_and_nanoseconds() {
        let doc = Document::new(&snapshot(), &meta(), "runner-0");
        let json = serde_json::to_value(&doc).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(json["workload"], "clair-load-test");
        assert_eq!(json["targets"], "get_index_report");
        assert_eq!(json["hostname"], "runner-0");
        assert_eq!(json["request_timeout"], 30);
        assert_eq!(json["p99_latency"], 4_000_000);
        assert_eq!(json["req_latency"], 2_500_000);
        assert_eq!(json["status_codes"]["200"], 4);
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(json["run_id"], "run-1");
    }

    #[test]
    fn document_without_latencies_reports_zero() {
        let mut snap = snapshot();
        snap.latencies = None;
        let doc = Document::new(&snap, &meta(), "h");
        assert_eq!(doc.p99_latency, 0);
        assert_eq!(doc.min_latency, 0);
    }

    #[tokio::test]
    async fn sink_url_defaults_to_http() {
        let sink = ElasticsearchSink::new(HttpClient::default(), "es.local/", "9200", "clair", "h");
        assert_eq!(sink.url(), "http://es.local:9200/clair/_doc");

        let sink = ElasticsearchSink::new(HttpClient::default(), "https://es", "443", "i", "h");
        assert_eq!(sink.url(), "https://es:443/i/_doc");
    }
}
