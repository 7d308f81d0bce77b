//! Error type shared by the walks, the sampling driver and the sinks.

use thiserror::Error;

/// Everything that can go wrong while building a walk or running a sampling session.
///
/// The effective-sample-size diagnostics never produce one of these; a low or zero
/// estimate is their way of reporting trouble.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    /// The starting point does not satisfy the body's constraints.
    #[error("starting point lies outside the convex body")]
    InfeasibleStart,

    /// A single step used up its bounded reflection or rejection budget. The walk
    /// keeps the point it held before the step.
    #[error("{walk} step exhausted its budget of {budget} reflections/attempts")]
    ConvergenceFailure { walk: &'static str, budget: usize },

    /// A fixed-size sink was asked to hold more samples than it was built for.
    #[error("sink capacity of {capacity} samples exceeded")]
    CapacityExceeded { capacity: usize },

    /// The walk cannot serve the requested distribution on the given body.
    #[error("{walk} walk cannot sample from {distribution} target: {reason}")]
    IncompatibleConfiguration {
        walk: &'static str,
        distribution: &'static str,
        reason: &'static str,
    },

    #[error("expected a point of dimension {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The body could not bound a ray through the current point.
    #[error("ray through the current point does not hit the boundary")]
    UnboundedDirection,

    /// The caller raised the cancellation flag.
    #[error("sampling cancelled after {steps} steps")]
    Cancelled { steps: usize },
}

pub type Result<T> = std::result::Result<T, SamplingError>;

impl SamplingError {
    /// Whether the run may continue after this error (the point stays valid, only
    /// the step did not complete).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SamplingError::ConvergenceFailure { .. })
    }
}
