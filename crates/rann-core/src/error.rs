//! Error types for network construction and validation

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building or validating a network
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required builder argument was never provided
    #[error("Missing builder argument: {argument}")]
    MissingArgument {
        /// Name of the missing argument
        argument: &'static str,
    },

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

    /// A layer with no neurons was requested
    #[error("Unable to construct zero sized layer at index {layer_index}")]
    EmptyLayer {
        /// Index of the offending layer
        layer_index: u32,
    },

    /// A per-neuron function override conflicts with the layer-wide filter
    #[error("Function override for neuron {neuron_index} of layer {layer_index} is outside the allowed set")]
    IncompatibleFunction {
        /// Index of the layer holding the neuron
        layer_index: u32,
        /// Relative index of the neuron inside the layer
        neuron_index: u32,
    },

    /// A synapse covering no indices was encountered
    #[error("Neuron {neuron_index} holds a zero sized synapse")]
    EmptySynapse {
        /// Index of the neuron owning the synapse
        neuron_index: u32,
    },

    /// Network topology violates a structural invariant
    #[error("Network topology error: {reason}")]
    InvalidTopology {
        /// Reason for the topology error
        reason: String,
    },

    /// An input reference points outside the network input array
    #[error("Neuron {neuron_index} references input {input_index} outside the input size {input_size}")]
    InputOutOfBounds {
        /// Index of the referencing neuron
        neuron_index: u32,
        /// Referenced network input index
        input_index: u32,
        /// Declared network input size
        input_size: u32,
    },

    /// A weight index lies outside the weight table or is owned twice
    #[error("Weight table error: {reason}")]
    WeightTable {
        /// Reason for the weight table error
        reason: String,
    },
}

impl CoreError {
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

    /// Create a topology error
    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopology {
            reason: reason.into(),
        }
    }

    /// Create a weight table error
    pub fn weight_table(reason: impl Into<String>) -> Self {
        Self::WeightTable {
            reason: reason.into(),
        }
    }
}
