//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Output format for process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON lines (production default).
    #[default]
    Json,
    /// Human-readable output for local development.
    Plain,
}

/// Initialize tracing/logging with the default (JSON) format.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    init_with_format(LogFormat::default());
}

/// Initialize tracing/logging with an explicit format.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Ledger and claim
/// storage operations are instrumented, so `RUST_LOG=aperture_infra=debug`
/// surfaces per-operation spans.
pub fn init_with_format(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Plain => builder.try_init(),
    };
    // Already-initialized is fine.
    let _ = result;
}
