//! Error types for kernel emission

use thiserror::Error;

/// Result type for emitter operations
pub type Result<T> = std::result::Result<T, EmitterError>;

/// Errors that can occur while emitting the training kernel
#[derive(Error, Debug)]
pub enum EmitterError {
    /// A substitution token survived into the final kernel source
    #[error("Unresolved substitution token '{token}' in the generated kernel")]
    UnresolvedToken {
        /// The leftover token
        token: String,
    },

    /// The operation graph is not in an emittable state
    #[error("Operation graph not emittable: {reason}")]
    GraphNotEmittable {
        /// Reason emission is impossible
        reason: String,
    },
}
