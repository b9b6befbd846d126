//! Structured logging setup using tracing.
//!
//! Log lines go to stderr so the JSON result on stdout stays machine-readable.
//! `RUST_LOG` overrides the filter passed on the command line.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line, for log aggregation.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

/// Build the filter: `RUST_LOG` when set and valid, otherwise `filter`.
pub fn build_filter(filter: &str) -> Result<EnvFilter, String> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| format!("Failed to create log filter '{filter}': {e}"))
}

/// Initialize the tracing subscriber.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_logging(filter: &str, format: LogFormat) -> Result<(), String> {
    let filter_layer = build_filter(filter)?;

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            )
            .with(filter_layer)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter_layer)
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(filter = %filter, ?format, "Logging initialized");
    }
    Ok(())
}

/// Initialize logging for tests (with simpler output).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
