//! Error types for the data layer

use thiserror::Error;

/// Result type for data layer operations
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur while assembling datasets or data buffers
#[derive(Error, Debug)]
pub enum DataError {
    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Dataset vectors do not describe a whole number of sequences
    #[error("Inconsistent dataset shape: {reason}")]
    InconsistentShape {
        /// Reason for the shape mismatch
        reason: String,
    },
}

impl DataError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create an inconsistent shape error
    pub fn inconsistent_shape(reason: impl Into<String>) -> Self {
        Self::InconsistentShape {
            reason: reason.into(),
        }
    }
}
