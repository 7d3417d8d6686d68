//! Structured-logging bootstrap.
//!
//! Grounded on the teacher's `main.rs`, which initializes
//! `tracing_subscriber` with an `EnvFilter` seeded from a per-crate default
//! directive. This module lifts that into a reusable function so both the
//! server binary and the CLI can share it, and adds a JSON-output mode for
//! production deployments per the ambient-stack requirements.
use tracing_subscriber::EnvFilter;

/// Output format for the global tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for local development.
    Pretty,
    /// Newline-delimited JSON, for log aggregation in production.
    Json,
}

/// Installs the global tracing subscriber.
///
/// Honors `RUST_LOG` if set; otherwise defaults to `clusterbus=info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("clusterbus=info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
}
