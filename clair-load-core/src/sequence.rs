use std::time::SystemTime;

use bytes::Bytes;
use clair_load_http::HttpClient;

use crate::attack::{AttackConfig, Attacker};
use crate::cancel::CancelSignal;
use crate::error::Result;
use crate::sink::{ResultSink, RunMetadata, SinkError};
use crate::stats::MetricsSnapshot;
use crate::targets::{Endpoint, Operation};

/// The resolved batch: manifests and, index-aligned, the hashes they are addressed by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    pub manifests: Vec<Bytes>,
    pub hashes: Vec<String>,
}

impl Workload {
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Pacing shared by every operation; the label is replaced per operation.
    pub attack: AttackConfig,
    pub endpoint: Endpoint,
    pub delete: bool,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct OperationReport {
    pub operation: Operation,
    pub snapshot: MetricsSnapshot,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub operations: Vec<OperationReport>,
    /// Operation label and the reason its result could not be published.
    pub publish_failures: Vec<(String, SinkError)>,
}

/// Called with each operation's result as soon as its attack completes.
pub type ReportFn<'a> = &'a mut (dyn FnMut(&OperationReport) + Send);

/// Runs the scanning-API operations one after another against one workload.
#[derive(Debug, Clone)]
pub struct Sequencer {
    attacker: Attacker,
    config: SequencerConfig,
}

impl Sequencer {
    #[must_use]
    pub fn new(client: HttpClient, cancel: CancelSignal, config: SequencerConfig) -> Self {
        Self {
            attacker: Attacker::new(client, cancel),
            config,
        }
    }

    /// Operations this sequencer will run, in order.
    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        Operation::SEQUENCE
            .into_iter()
            .filter(|op| self.config.delete || *op != Operation::DeleteIndexReport)
    }

    /// Attack each operation in turn. A failed attack stops the run; a failed publish
    /// is recorded and the run continues.
    pub async fn run<S: ResultSink>(
        &self,
        workload: &Workload,
        sink: Option<&S>,
        on_report: ReportFn<'_>,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        let meta = RunMetadata {
            run_id: self.config.run_id.clone(),
            host: self.config.endpoint.host().to_string(),
            rps: self.config.attack.rate().get(),
            operation_label: String::new(),
            timestamp: SystemTime::now(),
            request_timeout: self.config.attack.timeout(),
        };

        for op in self.operations() {
            let label = op.label();
            tracing::info!(operation = label, batch = workload.len(), "starting operation");

            let targets = op
                .targets(&self.config.endpoint, workload)
                .map_err(|e| e.in_operation(label))?;
            let snapshot = self
                .attacker
                .attack(&self.config.attack.relabel(label), &targets)
                .await
                .map_err(|e| e.in_operation(label))?;

            let done = OperationReport {
                operation: op,
                snapshot,
            };
            on_report(&done);

            if let Some(sink) = sink
                && let Err(e) = sink.publish(&done.snapshot, &meta.for_operation(label)).await
            {
                tracing::error!(operation = label, error = %e, "failed to publish results");
                report.publish_failures.push((label.to_string(), e));
            }

            report.operations.push(done);
        }

        Ok(report)
    }
}
