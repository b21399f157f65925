use crate::cli::OutputFormat;
use clair_load_core::{OperationReport, RunReport};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

mod human;
mod json;

/// What is being run, printed before the first attack.
#[derive(Debug, Clone)]
pub(crate) struct RunInfo {
    pub run_id: String,
    pub host: String,
    pub batch: usize,
    pub rate: u32,
    pub timeout: Duration,
    pub operations: Vec<&'static str>,
    pub config: EffectiveConfig,
}

/// The resolved `report` options, echoed at the end of a run. The pre-shared key is left out.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct EffectiveConfig {
    pub containers: Vec<String>,
    pub concurrency: usize,
    pub testrepoprefix: Option<String>,
    pub eshost: Option<String>,
    pub esport: Option<String>,
    pub esindex: Option<String>,
    pub host: String,
    pub hitsize: usize,
    pub delete: bool,
    pub uuid: String,
    pub rate: u32,
    #[serde(with = "humantime_serde_str")]
    pub timeout: Duration,
    pub max_in_flight: usize,
    pub results_dir: Option<PathBuf>,
}

mod humantime_serde_str {
    use std::time::Duration;

    pub(super) fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*d))
    }
}

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, info: &RunInfo);
    fn print_operation(&self, report: &OperationReport) -> anyhow::Result<()>;
    fn print_run(&self, info: &RunInfo, report: &RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
