//! Helpers related to tracing, used by main entrypoints.

/// Initialize tracing with the default configuration.
///
/// Timestamps are left out because this daemon normally runs under a
/// supervisor (e.g. journald) which already stamps output.
pub fn initialize_tracing() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(format)
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();
}
