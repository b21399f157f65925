pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no targets to attack for `{operation}`: the identifier list is empty")]
    EmptyTargetSet { operation: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid scanner host {0}")]
    InvalidHost(String),

    #[error("`rate` must be a positive number of requests per second")]
    InvalidRate,

    #[error("`timeout` must be a positive duration")]
    InvalidTimeout,

    #[error("`max_in_flight` must be a positive integer")]
    InvalidMaxInFlight,

    #[error("`concurrency` must be a positive integer")]
    InvalidConcurrency,

    #[error("metrics for `{label}` finalized early: observed {observed} of {expected} outcomes")]
    IncompleteOutcomes {
        label: String,
        observed: u64,
        expected: u64,
    },

    #[error("attack `{label}` cancelled after dispatching {dispatched} of {total} requests")]
    Cancelled {
        label: String,
        dispatched: u64,
        total: u64,
    },

    #[error("manifest resolution cancelled after {finished} of {total} containers")]
    ResolveCancelled { finished: usize, total: usize },

    #[error("request task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("manifest fetch task failed: {0}")]
    ManifestTask(#[source] tokio::task::JoinError),

    #[error("operation `{label}` failed: {source}")]
    Operation {
        label: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for problems with the run's inputs, detected before any request is sent.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::EmptyTargetSet { .. }
            | Self::InvalidTarget(_)
            | Self::InvalidHost(_)
            | Self::InvalidRate
            | Self::InvalidTimeout
            | Self::InvalidMaxInFlight
            | Self::InvalidConcurrency => true,
            Self::Operation { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } | Self::ResolveCancelled { .. } => true,
            Self::Operation { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// True for failures of the harness itself rather than of an attack.
    #[must_use]
    pub fn is_runtime(&self) -> bool {
        match self {
            Self::ManifestTask(_) => true,
            Self::Operation { source, .. } => source.is_runtime(),
            _ => false,
        }
    }

    pub(crate) fn in_operation(self, label: &str) -> Self {
        match self {
            already @ Self::Operation { .. } => already,
            other => Self::Operation {
                label: label.to_string(),
                source: Box::new(other),
            },
        }
    }
}
