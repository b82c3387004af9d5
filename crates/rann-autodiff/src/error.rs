//! Error types for graph construction and training

use thiserror::Error;

/// Result type for autodiff operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building or running the operation graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Core descriptor error
    #[error("Network error: {source}")]
    Core {
        /// Source core error
        #[from]
        source: rann_core::CoreError,
    },

    /// Data layer error
    #[error("Data error: {source}")]
    Data {
        /// Source data error
        #[from]
        source: rann_data::DataError,
    },

    /// A dependency landed at an operation index at or below its owner
    #[error("Operation {operation_index} depends on operation {dependency_index}; dependencies must come strictly later in the array")]
    DependencyOrder {
        /// Index of the depending operation
        operation_index: u32,
        /// Index of the offending dependency
        dependency_index: u32,
    },

    /// A dependency registration received the wrong number of handles
    #[error("Operation {operation_index} expected {expected} dependencies, got {got}")]
    DependencyCountMismatch {
        /// Index of the registering operation
        operation_index: u32,
        /// Number of dependencies the operation asked for
        expected: usize,
        /// Number of handles delivered
        got: usize,
    },

    /// Construction finished with spike placeholders never placed
    #[error("{count} spike operations were queued but never placed")]
    UnplacedOperations {
        /// Number of orphaned placeholders
        count: usize,
    },

    /// A neuron's spike operation could not be resolved
    #[error("No spike operation was placed for neuron {neuron_index}")]
    MissingSpike {
        /// Index of the unresolved neuron
        neuron_index: u32,
    },

    /// The router could not make progress over the network
    #[error("Neuron router stalled: {reason}")]
    RouterStalled {
        /// Reason for the stall
        reason: String,
    },

    /// Training was asked to run over an unusable dataset window
    #[error("Invalid training window: {reason}")]
    InvalidTrainingWindow {
        /// Reason the window is unusable
        reason: String,
    },
}
