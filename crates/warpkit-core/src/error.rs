//! Error types for core image and transformation operations.

use thiserror::Error;

/// Errors raised by the core containers, kernels and transformations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// An argument is outside its documented domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Two grids that must agree do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A flat buffer does not have the length its shape requires.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A factory descriptor string could not be parsed or resolved.
    #[error("Descriptor error in '{descriptor}': {message}")]
    Descriptor { descriptor: String, message: String },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Create a shape mismatch error from two grid sizes.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a descriptor error.
    pub fn descriptor(descriptor: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Descriptor {
            descriptor: descriptor.into(),
            message: msg.into(),
        }
    }
}
