// crates/climate-eval-config/src/logging.rs
// ============================================================================
// Module: Logging Initialization
// Description: One-shot tracing subscriber setup from configuration.
// Purpose: Route structured engine events through a single global
//          subscriber.
// Dependencies: tracing, tracing-subscriber
// ============================================================================

//! ## Overview
//! The engine logs through `tracing`; the CLI initializes the global
//! subscriber exactly once from the configured `log_level`. An explicit
//! `RUST_LOG` environment filter takes precedence over the configured level,
//! matching the precedence rule for every other environment override.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

// ============================================================================
// SECTION: Initialization
// ============================================================================

/// Initializes the global tracing subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
