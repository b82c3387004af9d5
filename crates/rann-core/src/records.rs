//! Persistence-neutral logical record of a network descriptor
//!
//! The record mirrors the descriptor as flat tables so any persistence layer
//! can carry it without knowing the in-memory layout. Encoding and decoding
//! are exact inverses; decoding re-runs the full descriptor validation.

use smallvec::SmallVec;

use crate::error::Result;
use crate::function::{InputFunction, SpikeFunction, TransferFunction};
use crate::network::{FeatureGroup, FeatureKind, Neuron, NeuronNetwork};
use crate::synapse::{IndexSynapse, InputSynapse, WeightSynapse};

/// One neuron row of the logical record
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NeuronRecord {
    /// Input function tag
    pub input_function: InputFunction,
    /// Transfer function tag
    pub transfer_function: TransferFunction,
    /// Spike function tag
    pub spike_function: SpikeFunction,
    /// Input synapse intervals
    pub input_synapses: Vec<InputSynapse>,
    /// Weight synapse intervals
    pub weight_synapses: Vec<WeightSynapse>,
}

/// One feature group row of the logical record
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureGroupRecord {
    /// Feature kind tag
    pub kind: FeatureKind,
    /// Covered neuron index intervals
    pub neuron_synapses: Vec<IndexSynapse>,
}

/// The full logical network record
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkRecord {
    /// Network input vector length
    pub input_size: u32,
    /// Number of output neurons
    pub output_count: u32,
    /// Maximum past-loop count any synapse reaches
    pub memory_size: u32,
    /// Flat weight table
    pub weights: Vec<f64>,
    /// Neuron table in array order
    pub neurons: Vec<NeuronRecord>,
    /// Feature group table
    pub feature_groups: Vec<FeatureGroupRecord>,
}

impl NetworkRecord {
    /// Encode a descriptor into its logical record
    pub fn encode(network: &NeuronNetwork) -> Self {
        Self {
            input_size: network.input_size(),
            output_count: network.output_count(),
            memory_size: network.memory_size(),
            weights: network.weight_table().to_vec(),
            neurons: network
                .neurons()
                .iter()
                .map(|neuron| NeuronRecord {
                    input_function: neuron.input_function,
                    transfer_function: neuron.transfer_function,
                    spike_function: neuron.spike_function,
                    input_synapses: neuron.input_synapses.to_vec(),
                    weight_synapses: neuron.weight_synapses.to_vec(),
                })
                .collect(),
            feature_groups: network
                .feature_groups()
                .iter()
                .map(|group| FeatureGroupRecord {
                    kind: group.kind,
                    neuron_synapses: group.neurons.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild and revalidate the descriptor from the record
    pub fn decode(&self) -> Result<NeuronNetwork> {
        NeuronNetwork::new(
            self.input_size,
            self.memory_size,
            self.output_count,
            self.weights.clone(),
            self.neurons
                .iter()
                .map(|record| Neuron {
                    input_function: record.input_function,
                    transfer_function: record.transfer_function,
                    spike_function: record.spike_function,
                    input_synapses: SmallVec::from_slice(&record.input_synapses),
                    weight_synapses: SmallVec::from_slice(&record.weight_synapses),
                })
                .collect(),
            self.feature_groups
                .iter()
                .map(|record| FeatureGroup {
                    kind: record.kind,
                    neurons: record.neuron_synapses.clone(),
                })
                .collect(),
        )
    }
}
