use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clair_load_core::RunReport;

pub(crate) fn result_path(dir: &Path, run_id: &str, label: &str) -> PathBuf {
    dir.join(format!("{run_id}_{label}_result.json"))
}

pub(crate) async fn prepare_dir(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create results dir: {}", dir.display()))
}

/// One pretty-printed snapshot per completed operation.
pub(crate) async fn write_results(
    dir: &Path,
    run_id: &str,
    report: &RunReport,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(report.operations.len());
    for op in &report.operations {
        let path = result_path(dir, run_id, &op.snapshot.label);
        let json = serde_json::to_vec_pretty(&op.snapshot)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write results: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "results written");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clair_load_core::{MetricsSnapshot, Operation, OperationReport};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn snapshot(label: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            label: label.to_string(),
            requests: 3,
            throughput: 1.5,
            success_ratio: 1.0,
            duration: Duration::from_secs(2),
            status_codes: BTreeMap::from([("200".to_string(), 3)]),
            errors: BTreeMap::new(),
            latencies: None,
            bytes_in_mean: 0.0,
            bytes_out_mean: 0.0,
            bytes_in_total: 0,
            bytes_out_total: 0,
        }
    }

    #[tokio::test]
    async fn writes_one_file_per_operation() {
        let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let dir = tmp.path().join("logs");
        prepare_dir(&dir).await.unwrap_or_else(|e| panic!("{e:#}"));

        let report = RunReport {
            operations: vec![
                OperationReport {
                    operation: Operation::CreateIndexReport,
                    snapshot: snapshot("post_index_report"),
                },
                OperationReport {
                    operation: Operation::GetIndexReport,
                    snapshot: snapshot("get_index_report"),
                },
            ],
            publish_failures: Vec::new(),
        };

        let written = write_results(&dir, "run-7", &report)
            .await
            .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(
            written,
            vec![
                dir.join("run-7_post_index_report_result.json"),
                dir.join("run-7_get_index_report_result.json"),
            ]
        );
        let body = std::fs::read(&written[1]).unwrap_or_else(|e| panic!("{e}"));
        let value: serde_json::Value =
            serde_json::from_slice(&body).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value["label"], "get_index_report");
        assert_eq!(value["requests"], 3);
    }
}
