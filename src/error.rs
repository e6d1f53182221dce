use thiserror::Error;

/// Unified error type for `ilqr` operations.
#[derive(Debug, Error)]
pub enum IlqrError {
    /// Raised when provided vectors or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, usually implied by the solver configuration.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a cost matrix is not symmetric.
    #[error("matrix in {context} is not symmetric")]
    NotSymmetric { context: &'static str },

    /// Raised when a cost matrix contains NaN or infinite entries.
    #[error("matrix in {context} contains a non-finite entry")]
    NonFiniteMatrix { context: &'static str },

    /// Raised when a cost matrix has a negative eigenvalue.
    #[error("matrix in {context} is not positive-semidefinite (smallest eigenvalue {eigenvalue})")]
    NotPositiveSemidefinite {
        context: &'static str,
        eigenvalue: f64,
    },

    /// Raised when a solve option takes a value outside its admissible range.
    #[error("option {context} has invalid value {value}")]
    InvalidOption { context: &'static str, value: f64 },

    /// Raised when the dynamics function produces a non-finite value with no
    /// viable alternative trajectory.
    #[error("encountered a non-finite value during {context} at timestep {timestep}")]
    NumericalDivergence {
        context: &'static str,
        timestep: usize,
    },

    /// Raised when the control Hessian stays indefinite after exhausting the
    /// regularization budget.
    #[error(
        "control Hessian at timestep {timestep} is not positive-definite even with regularization {mu}"
    )]
    SingularSystem { timestep: usize, mu: f64 },

    /// Raised when no line-search step is accepted after exhausting the
    /// regularization budget.
    #[error("line search found no acceptable step with regularization {mu} (current cost {cost})")]
    LineSearchFailed { mu: f64, cost: f64 },
}

impl IlqrError {
    /// Helper to format a [`DimensionMismatch`](IlqrError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to raise when a rollout or Jacobian evaluation leaves the finite domain.
    pub fn divergence(context: &'static str, timestep: usize) -> Self {
        Self::NumericalDivergence { context, timestep }
    }

    /// Helper for rejecting out-of-range solver options.
    pub fn invalid_option(context: &'static str, value: f64) -> Self {
        Self::InvalidOption { context, value }
    }

    /// Re-tags a divergence error with the timestep it occurred at.
    pub(crate) fn at_timestep(self, timestep: usize) -> Self {
        match self {
            Self::NumericalDivergence { context, .. } => {
                Self::NumericalDivergence { context, timestep }
            }
            other => other,
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, IlqrError>;
