//! Initializes `tracing` the way every process-group rank should: one
//! `EnvFilter`-driven subscriber per process, rank number folded into every
//! span so interleaved output from a multi-rank run stays attributable.

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber reading `RUST_LOG` (default `info`).
/// Safe to call more than once per process — later calls are a no-op.
pub fn init(rank: usize) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .try_init();
    tracing::debug!(rank, "tracing initialized");
}
