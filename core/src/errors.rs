//! Crate-wide error types.
//!
//! The range algebra and the fixpoint driver are exception-free by design
//! (every operation returns a status code or boolean, see [`crate::range`]
//! and [`crate::value_set`]); the one boundary that legitimately fails is
//! malformed solver configuration. Arena indices never escape to a caller
//! (the public surface is keyed by the embedder's own `Variable`, not a raw
//! [`crate::value_set::ValueSetId`]), so there is no "foreign id" error to
//! surface; an out-of-bounds internal lookup would be this crate's own bug,
//! not a caller mistake, and panics accordingly.

use thiserror::Error;

// SOLVER CONFIGURATION
// ================================================================================================

/// Error constructing a [`crate::solver::SolverConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SolverConfigError {
    /// `max_iterations` must allow at least one sweep.
    #[error("max_iterations must be at least 1")]
    ZeroIterationBudget,
    /// `widen_after` of 0 would widen before ever observing a second value.
    #[error("widen_after must be at least 1")]
    ZeroWideningThreshold,
}
