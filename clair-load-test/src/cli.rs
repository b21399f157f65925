use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use clair_load_core::DEFAULT_MAX_IN_FLIGHT;
use clair_load_core::manifests::containers_from_prefix;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(input.trim())
        .map_err(|e| format!("invalid duration '{input}' (expected e.g. 30s, 500ms, 1m): {e}"))?;
    if d.is_zero() {
        return Err("duration must be positive".to_string());
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary per operation.
    HumanReadable,
    /// One NDJSON line per operation plus a final run line.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "clair-load-test",
    author,
    version,
    about = "Load testing for a container vulnerability-scanning service",
    long_about = "clair-load-test resolves a batch of container images to scan manifests, then drives the scanner's index, report and state endpoints at a fixed request rate, one operation after another, and reports latency and throughput for each.",
    after_help = "Examples:\n  clair-load-test report --containers ubuntu:latest,mysql:latest --psk $PSK\n  clair-load-test report --testrepoprefix quay.io/org/repo --hitsize 100 --rate 50\n  clair-load-test createtoken --key $PSK"
)]
pub struct Cli {
    /// Print debug logs
    #[arg(short = 'D', long = "debug", global = true)]
    pub debug: bool,

    /// Print only warnings and errors
    #[arg(short = 'W', long = "warn", global = true, conflicts_with = "debug")]
    pub warn: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Request reports for a batch of containers
    Report(ReportArgs),

    /// Create a bearer token from a pre-shared key
    #[command(name = "createtoken")]
    CreateToken(CreateTokenArgs),
}

#[derive(Debug, Args)]
pub struct CreateTokenArgs {
    /// Base64-encoded pre-shared key
    #[arg(long, env = "PSK_KEY")]
    pub key: String,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["containers", "testrepoprefix"])
))]
pub struct ReportArgs {
    /// Scanner base URL
    #[arg(long, env = "CLAIR_TEST_HOST", default_value = "http://localhost:6060/")]
    pub host: String,

    /// Run identifier attached to published results (random when omitted)
    #[arg(long, env = "CLAIR_TEST_UUID")]
    pub uuid: Option<String>,

    /// Comma-separated container references
    #[arg(long, env = "CLAIR_TEST_CONTAINERS", value_delimiter = ',')]
    pub containers: Vec<String>,

    /// Repository prefix; expands to `<prefix>_tag_1` .. `<prefix>_tag_<hitsize>`
    #[arg(long, env = "CLAIR_TEST_REPO_PREFIX")]
    pub testrepoprefix: Option<String>,

    /// Base64-encoded pre-shared key used to sign the bearer token
    #[arg(long, env = "CLAIR_TEST_PSK", default_value = "")]
    pub psk: String,

    /// Result store host
    #[arg(long, env = "CLAIR_TEST_ES_HOST")]
    pub eshost: Option<String>,

    /// Result store port
    #[arg(long, env = "CLAIR_TEST_ES_PORT")]
    pub esport: Option<String>,

    /// Result store index
    #[arg(long, env = "CLAIR_TEST_ES_INDEX")]
    pub esindex: Option<String>,

    /// Delete index reports once the reads are done
    #[arg(long, env = "CLAIR_TEST_INDEX_REPORT_DELETE")]
    pub delete: bool,

    /// Batch size: number of containers to test
    #[arg(long, env = "CLAIR_TEST_HIT_SIZE", default_value_t = 25)]
    pub hitsize: usize,

    /// Parallel manifest fetches
    #[arg(long, env = "CLAIR_TEST_CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    /// Requests per second for every operation
    #[arg(long, env = "CLAIR_TEST_RATE", default_value_t = 10)]
    pub rate: u32,

    /// Per-request deadline (e.g. 30s, 500ms)
    #[arg(long, env = "CLAIR_TEST_TIMEOUT", value_parser = parse_duration, default_value = "30s")]
    pub timeout: Duration,

    /// Upper bound on requests awaiting a response
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    /// Manifest tool to run as `<clairctl> manifest <container>`
    #[arg(long, default_value = "clairctl")]
    pub clairctl: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Write each operation's metrics to `<dir>/<uuid>_<operation>_result.json`
    #[arg(long, env = "CLAIR_TEST_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,
}

impl ReportArgs {
    /// The batch to test, truncated to `hitsize`.
    pub fn container_list(&self) -> Vec<String> {
        let mut containers = match &self.testrepoprefix {
            Some(prefix) => containers_from_prefix(prefix, self.hitsize),
            None => self
                .containers
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        };
        containers.truncate(self.hitsize);
        containers
    }

    /// Result store coordinates, only when all three are set.
    pub fn result_store(&self) -> Option<(&str, &str, &str)> {
        fn non_empty(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.is_empty())
        }
        Some((
            non_empty(&self.eshost)?,
            non_empty(&self.esport)?,
            non_empty(&self.esindex)?,
        ))
    }
}
