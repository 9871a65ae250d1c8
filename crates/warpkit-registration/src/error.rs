//! Error types for registration operations.
//!
//! Errors abort a registration run. Failing to converge is not an error:
//! minimizers and solvers report it through their status values.

use thiserror::Error;
use warpkit_core::CoreError;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// An argument is outside its documented domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal numeric fault that cannot be recovered.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Error in cost function computation.
    #[error("Metric error: {0}")]
    MetricError(String),

    /// Error in optimizer operation.
    #[error("Optimizer error: {0}")]
    OptimizerError(String),

    /// Error in transform operation.
    #[error("Transform error: {0}")]
    TransformError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Error raised by the core containers, kernels or transformations.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a metric error.
    pub fn metric(msg: impl Into<String>) -> Self {
        Self::MetricError(msg.into())
    }

    /// Create an optimizer error.
    pub fn optimizer(msg: impl Into<String>) -> Self {
        Self::OptimizerError(msg.into())
    }

    /// Create a transform error.
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::TransformError(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a shape mismatch error from two grid sizes.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Whether this error reports an invalid argument, directly or from the
    /// core crate.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::ShapeMismatch { .. }
                | Self::Core(CoreError::InvalidArgument(_))
                | Self::Core(CoreError::ShapeMismatch { .. })
                | Self::Core(CoreError::DimensionMismatch(_))
                | Self::Core(CoreError::Descriptor { .. })
        )
    }
}
