use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber. `RUST_LOG`, when set, overrides the flags.
pub(crate) fn init(debug: bool, warn: bool) {
    let default = if debug {
        "debug"
    } else if warn {
        "warn"
    } else {
        "info"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
