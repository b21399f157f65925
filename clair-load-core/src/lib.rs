//! Request orchestration and attack execution for load testing a container
//! vulnerability-scanning service.
//!
//! The flow is `targets` (build a [`TargetSet`]) → `attack` (drive it at a fixed rate)
//! → `stats` (fold outcomes into a [`MetricsSnapshot`]) → `sink` (publish), with
//! `sequence` running the fixed list of scanning-API operations one after another.

mod attack;
mod cancel;
mod error;
mod limiter;
pub mod manifests;
mod sequence;
pub mod sink;
mod stats;
mod targets;
pub mod token;

pub use attack::{AttackConfig, Attacker, DEFAULT_MAX_IN_FLIGHT, Outcome};
pub use cancel::CancelSignal;
pub use error::{Error, Result};
pub use limiter::DispatchLimiter;
pub use sequence::{OperationReport, ReportFn, RunReport, Sequencer, SequencerConfig, Workload};
pub use stats::{Aggregator, LatencySummary, MetricsSnapshot};
pub use targets::{Endpoint, Operation, RequestDescriptor, TargetSet};

pub use clair_load_http::{HttpClient, HttpTransportErrorKind};
