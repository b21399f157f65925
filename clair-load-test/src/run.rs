use std::sync::Arc;

use anyhow::Context as _;
use clair_load_core::manifests::{ClairctlManifests, resolve};
use clair_load_core::sink::ElasticsearchSink;
use clair_load_core::{
    AttackConfig, CancelSignal, Endpoint, HttpClient, OperationReport, Sequencer, SequencerConfig,
};

use crate::cli::{CreateTokenArgs, ReportArgs};
use crate::exit_codes::ExitCode;
use crate::output::{self, EffectiveConfig, RunInfo};
use crate::results;
use crate::run_error::RunError;

pub async fn report(args: ReportArgs) -> Result<ExitCode, RunError> {
    // Everything that can be rejected up front is, before any process or network call.
    let attack = AttackConfig::new(args.rate, args.timeout, "report")
        .and_then(|c| c.with_max_in_flight(args.max_in_flight))
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    if args.concurrency == 0 {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "--concurrency must be a positive integer"
        )));
    }
    let containers = args.container_list();
    if containers.is_empty() {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "no containers to test (check --containers/--testrepoprefix and --hitsize)"
        )));
    }
    let token = clair_load_core::token::mint(&args.psk)
        .context("could not create token")
        .map_err(RunError::InvalidInput)?;
    let endpoint = Endpoint::new(&args.host, token)
        .map_err(|e| RunError::InvalidInput(anyhow::Error::from(e).context("invalid --host")))?;

    let run_id = args
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    let source = Arc::new(ClairctlManifests::new(args.clairctl.clone()));
    let workload = resolve(source, &containers, args.concurrency, &cancel).await?;
    if workload.is_empty() {
        return Err(RunError::RuntimeError(anyhow::anyhow!(
            "none of the {} containers could be resolved to a manifest",
            containers.len()
        )));
    }

    if let Some(dir) = &args.results_dir {
        results::prepare_dir(dir).await.map_err(RunError::RuntimeError)?;
    }

    let client = HttpClient::default();
    let sink = args.result_store().map(|(host, port, index)| {
        ElasticsearchSink::new(client.clone(), host, port, index, hostname())
    });
    if let Some(sink) = &sink {
        tracing::info!(url = sink.url(), "publishing results");
    }

    let sequencer = Sequencer::new(
        client,
        cancel,
        SequencerConfig {
            attack,
            endpoint: endpoint.clone(),
            delete: args.delete,
            run_id: run_id.clone(),
        },
    );

    let info = RunInfo {
        run_id: run_id.clone(),
        host: endpoint.host().to_string(),
        batch: workload.len(),
        rate: args.rate,
        timeout: args.timeout,
        operations: sequencer.operations().map(|op| op.label()).collect(),
        config: effective_config(&args, containers, &run_id),
    };

    let out = output::formatter(args.output);
    out.print_header(&info);

    let mut on_report = |r: &OperationReport| {
        if let Err(e) = out.print_operation(r) {
            tracing::warn!(error = %e, "failed to print summary");
        }
    };
    let report = sequencer
        .run(&workload, sink.as_ref(), &mut on_report)
        .await?;

    if let Some(dir) = &args.results_dir {
        results::write_results(dir, &run_id, &report)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    out.print_run(&info, &report)
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_publish_failures(report.publish_failures.len()))
}

pub fn create_token(args: &CreateTokenArgs) -> Result<ExitCode, RunError> {
    let token = clair_load_core::token::mint(&args.key)
        .context("could not create token")
        .map_err(RunError::InvalidInput)?;
    println!("{token}");
    Ok(ExitCode::Success)
}

fn effective_config(args: &ReportArgs, containers: Vec<String>, run_id: &str) -> EffectiveConfig {
    EffectiveConfig {
        containers,
        concurrency: args.concurrency,
        testrepoprefix: args.testrepoprefix.clone(),
        eshost: args.eshost.clone(),
        esport: args.esport.clone(),
        esindex: args.esindex.clone(),
        host: args.host.clone(),
        hitsize: args.hitsize,
        delete: args.delete,
        uuid: run_id.to_string(),
        rate: args.rate,
        timeout: args.timeout,
        max_in_flight: args.max_in_flight,
        results_dir: args.results_dir.clone(),
    }
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}
