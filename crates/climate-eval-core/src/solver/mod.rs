// crates/climate-eval-core/src/solver/mod.rs
// ============================================================================
// Module: Climate Eval Solver
// Description: Requirement resolution and execution diffing.
// Purpose: Turn declared diagnostics plus the catalog into pending executions.
// Dependencies: crate::core, crate::interfaces, tracing
// ============================================================================

//! ## Overview
//! The solver module hosts the requirement resolver and the solve pass. The
//! resolver is pure over a catalog snapshot; the solve pass holds the
//! advisory lease and mutates the store one group transaction at a time.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod resolver;
pub mod solve;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use resolver::ExecutionCandidate;
pub use resolver::resolve_diagnostic;
pub use solve::SOLVER_LEASE_NAME;
pub use solve::SOLVER_LEASE_TTL;
pub use solve::SolveError;
pub use solve::SolveOptions;
pub use solve::SolveOutcome;
pub use solve::solve;
