// crates/climate-eval-config/src/lib.rs
// ============================================================================
// Module: Climate Eval Config Library
// Description: Configuration loading, validation, and logging setup.
// Purpose: Provide the immutable configuration every component receives.
// Dependencies: crate::{config, logging}
// ============================================================================

//! ## Overview
//! Configuration is loaded once, validated fail-closed, and passed by
//! reference; there are no mutable configuration singletons anywhere in the
//! engine.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod logging;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CACHE_DIR_ENV_VAR;
pub use config::CONFIG_DIR_ENV_VAR;
pub use config::CONFIG_FILE_NAME;
pub use config::ConfigError;
pub use config::DbConfig;
pub use config::EvalConfig;
pub use config::ExecutorConfig;
pub use config::ExecutorSettings;
pub use config::LogLevel;
pub use config::PathsConfig;
pub use config::ProviderEntry;
pub use logging::init_logging;
