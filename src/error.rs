//! Error types for the analysis core

use thiserror::Error;

/// Result alias used by the similarity, clustering, network and statistics modules.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised by the analysis core.
///
/// Rows dropped by a join are not errors; they are counted on the
/// structures that perform the join.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    /// Input violates a structural precondition (zero variance, empty matrix,
    /// malformed county key, unknown column, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough rows or groups for the requested computation.
    #[error("Insufficient data: required {required}, actual {actual}")]
    InsufficientData {
        /// Minimum required rows or groups
        required: usize,
        /// Rows or groups actually available
        actual: usize,
    },

    /// Power iteration did not converge within the iteration limit.
    #[error("Did not converge after {iterations} iterations")]
    ConvergenceFailure {
        /// Number of iterations attempted
        iterations: usize,
    },
}

impl AnalysisError {
    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }
}
