use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use clair_load_core::manifests::{ManifestError, ManifestSource, resolve};
use clair_load_core::sink::{ElasticsearchSink, ResultSink, RunMetadata, SinkError};
use clair_load_core::{
    AttackConfig, CancelSignal, Endpoint, Error, HttpClient, MetricsSnapshot, OperationReport,
    Sequencer, SequencerConfig, Workload,
};
use clair_load_testserver::{TestServer, TestServerOptions};
use parking_lot::Mutex;

struct FixedManifests;

impl ManifestSource for FixedManifests {
    async fn fetch(&self, container: &str) -> Result<Bytes, ManifestError> {
        Ok(Bytes::from(format!(
            r#"{{"hash":"sha256:{container}","layers":[]}}"#
        )))
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(String, u64)>>,
}

impl ResultSink for RecordingSink {
    async fn publish(&self, snapshot: &MetricsSnapshot, meta: &RunMetadata) -> Result<(), SinkError> {
        self.published
            .lock()
            .push((meta.operation_label.clone(), snapshot.requests));
        Ok(())
    }
}

async fn workload(n: usize) -> anyhow::Result<Workload> {
    let containers: Vec<String> = (1..=n).map(|i| format!("repo_tag_{i}")).collect();
    Ok(resolve(Arc::new(FixedManifests), &containers, 4, &CancelSignal::new()).await?)
}

fn sequencer(server: &TestServer, delete: bool) -> anyhow::Result<Sequencer> {
    let config = SequencerConfig {
        attack: AttackConfig::new(200, Duration::from_secs(5), "template")?,
        endpoint: Endpoint::new(&format!("{}/", server.base_url()), "test-token")?,
        delete,
        run_id: "run-1".to_string(),
    };
    Ok(Sequencer::new(HttpClient::default(), CancelSignal::new(), config))
}

#[tokio::test]
async fn full_sequence_runs_every_operation_in_order() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let workload = workload(4).await?;
    let sink = RecordingSink::default();

    let mut seen = Vec::new();
    let mut on_report = |r: &OperationReport| seen.push(r.operation.label().to_string());
    let report = sequencer(&server, true)?
        .run(&workload, Some(&sink), &mut on_report)
        .await?;

    anyhow::ensure!(
        seen == [
            "post_index_report",
            "get_index_report",
            "get_vulnerability_report",
            "get_indexer_state",
            "delete_index_report",
        ],
        "seen={seen:?}"
    );
    anyhow::ensure!(report.publish_failures.is_empty());

    for op in &report.operations {
        anyhow::ensure!(op.snapshot.requests == 4, "{}: {}", op.snapshot.label, op.snapshot.requests);
        anyhow::ensure!(
            (op.snapshot.success_ratio - 1.0).abs() < f64::EPSILON,
            "{}: {:?}",
            op.snapshot.label,
            op.snapshot.status_codes
        );
    }

    let stats = server.stats();
    anyhow::ensure!(stats.route_count("GET /indexer/api/v1/index_state") == 4);
    anyhow::ensure!(stats.route_count("DELETE /indexer/api/v1/index_report") == 4);
    anyhow::ensure!(stats.saw_bearer_token() == stats.requests_total());
    anyhow::ensure!(stats.saw_json_content_type() == stats.requests_total());

    let published = sink.published.lock().clone();
    anyhow::ensure!(published.len() == 5);
    anyhow::ensure!(published.iter().all(|(_, n)| *n == 4));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn delete_is_skipped_unless_enabled() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let workload = workload(2).await?;

    let mut on_report = |_: &OperationReport| {};
    let report = sequencer(&server, false)?
        .run(&workload, None::<&ElasticsearchSink>, &mut on_report)
        .await?;

    anyhow::ensure!(report.operations.len() == 4);
    anyhow::ensure!(server.stats().route_count("DELETE /indexer/api/v1/index_report") == 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failing_hashes_show_up_as_server_errors() -> anyhow::Result<()> {
    let options = TestServerOptions {
        failing_hashes: ["sha256:repo_tag_2".to_string()].into(),
        ..TestServerOptions::default()
    };
    let server = TestServer::start_with(options).await.context("start test server")?;
    let workload = workload(3).await?;
    let sink = RecordingSink::default();

    let mut on_report = |_: &OperationReport| {};
    let report = sequencer(&server, false)?
        .run(&workload, Some(&sink), &mut on_report)
        .await?;

    let create = &report.operations[0].snapshot;
    anyhow::ensure!(create.status_codes.get("201") == Some(&2), "{:?}", create.status_codes);
    anyhow::ensure!(create.status_codes.get("500") == Some(&1));
    anyhow::ensure!(sink.published.lock().len() == 4);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn empty_workload_aborts_before_any_request() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let mut on_report = |_: &OperationReport| {};
    let err = sequencer(&server, true)?
        .run(&Workload::default(), None::<&ElasticsearchSink>, &mut on_report)
        .await
        .err()
        .context("expected an error")?;

    anyhow::ensure!(err.is_configuration(), "err={err}");
    anyhow::ensure!(matches!(err, Error::Operation { ref label, .. } if label == "post_index_report"));
    anyhow::ensure!(server.stats().requests_total() == 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn elasticsearch_documents_are_indexed_per_operation() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let workload = workload(2).await?;
    let addr = server.addr();
    let sink = ElasticsearchSink::new(
        HttpClient::default(),
        &addr.ip().to_string(),
        &addr.port().to_string(),
        "clair-results",
        "runner-0",
    );

    let mut on_report = |_: &OperationReport| {};
    let report = sequencer(&server, false)?
        .run(&workload, Some(&sink), &mut on_report)
        .await?;
    anyhow::ensure!(report.publish_failures.is_empty());

    let docs = server.stats().documents();
    anyhow::ensure!(docs.len() == 4, "docs={}", docs.len());
    anyhow::ensure!(docs[0]["targets"] == "post_index_report");
    anyhow::ensure!(docs[0]["run_id"] == "run-1");
    anyhow::ensure!(docs[0]["rps"] == 200);
    anyhow::ensure!(docs[0]["requests"] == 2);
    anyhow::ensure!(docs[0]["hostname"] == "runner-0");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_publishes_do_not_abort_the_run() -> anyhow::Result<()> {
    let options = TestServerOptions {
        reject_documents: true,
        ..TestServerOptions::default()
    };
    let server = TestServer::start_with(options).await.context("start test server")?;
    let workload = workload(1).await?;
    let addr = server.addr();
    let sink = ElasticsearchSink::new(
        HttpClient::default(),
        &addr.ip().to_string(),
        &addr.port().to_string(),
        "clair-results",
        "runner-0",
    );

    let mut on_report = |_: &OperationReport| {};
    let report = sequencer(&server, true)?
        .run(&workload, Some(&sink), &mut on_report)
        .await?;

    anyhow::ensure!(report.operations.len() == 5);
    anyhow::ensure!(report.publish_failures.len() == 5);
    anyhow::ensure!(report.publish_failures.iter().all(|(_, e)| matches!(
        e,
        SinkError::Rejected { status: 503, .. }
    )));

    server.shutdown().await;
    Ok(())
}
