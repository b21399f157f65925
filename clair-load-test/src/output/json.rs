use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;

use clair_load_core::{MetricsSnapshot, OperationReport, RunReport};

use super::{EffectiveConfig, OutputFormatter, RunInfo};

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _info: &RunInfo) {}

    fn print_operation(&self, report: &OperationReport) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            snapshot: &report.snapshot,
        })
    }

    fn print_run(&self, info: &RunInfo, report: &RunReport) -> anyhow::Result<()> {
        emit_json_line(&build_run_line(info, report))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    #[serde(flatten)]
    pub snapshot: &'a MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonRunLine {
    pub kind: &'static str,
    pub run_id: String,
    pub host: String,
    pub batch: usize,
    pub rate: u32,
    pub operations: Vec<String>,
    pub requests_total: u64,
    /// Operation label -> publish error.
    pub publish_failures: BTreeMap<String, String>,
    pub config: EffectiveConfig,
}

fn build_run_line(info: &RunInfo, report: &RunReport) -> JsonRunLine {
    JsonRunLine {
        kind: "run",
        run_id: info.run_id.clone(),
        host: info.host.clone(),
        batch: info.batch,
        rate: info.rate,
        operations: report
            .operations
            .iter()
            .map(|op| op.snapshot.label.clone())
            .collect(),
        requests_total: report.operations.iter().map(|op| op.snapshot.requests).sum(),
        publish_failures: report
            .publish_failures
            .iter()
            .map(|(label, err)| (label.clone(), err.to_string()))
            .collect(),
        config: info.config.clone(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, line)?;
    writeln!(out)?;
    Ok(())
}
