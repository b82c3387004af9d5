//! Layered network descriptor
//!
//! The descriptor is a directed graph of neurons grouped into ordered layers.
//! Each neuron references its input sources and its weight slice through
//! synapses, and carries the input/transfer/spike function tags assigned at
//! build time. The weight table is flat; every slot is owned by exactly one
//! neuron. Cycles are expressed exclusively through `reach_past > 0` synapses.

use smallvec::SmallVec;

use crate::error::{CoreError, Result};
use crate::function::{InputFunction, SpikeFunction, TransferFunction};
use crate::synapse::{IndexSynapse, InputRef, InputSynapse, WeightSynapse};

/// Per-layer decoration over a group of neurons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeatureKind {
    /// Normalise the outputs of the group to a probability distribution
    Softmax,
    /// Recurrent self-connectivity across the whole group
    BoltzmannKnot,
    /// L1 weight penalty over the group's weights
    L1Regularization,
    /// L2 weight penalty over the group's weights
    L2Regularization,
    /// Randomly zero the group's outputs while training
    Dropout,
}

impl FeatureKind {
    /// Whether the feature contributes to the performance (error) surface
    pub fn is_performance_relevant(self) -> bool {
        matches!(
            self,
            FeatureKind::L1Regularization | FeatureKind::L2Regularization
        )
    }

    /// Whether the feature changes the forward solution of the network
    pub fn is_solution_relevant(self) -> bool {
        matches!(
            self,
            FeatureKind::Softmax | FeatureKind::BoltzmannKnot | FeatureKind::Dropout
        )
    }
}

/// A group of neurons tagged for a bulk operation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureGroup {
    /// The bulk operation assigned to the group
    pub kind: FeatureKind,
    /// Covered neuron index intervals
    pub neurons: Vec<IndexSynapse>,
}

impl FeatureGroup {
    /// Iterate the expanded neuron indices of the group
    pub fn iter_neurons(&self) -> impl Iterator<Item = u32> + '_ {
        self.neurons
            .iter()
            .flat_map(|synapse| synapse.start..(synapse.start + synapse.size))
    }

    /// Whether the group covers the given neuron
    pub fn contains(&self, neuron_index: u32) -> bool {
        self.neurons
            .iter()
            .any(|s| (s.start..(s.start + s.size)).contains(&neuron_index))
    }
}

/// One processing unit of the network
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Neuron {
    /// Reducer collecting the weighted inputs
    pub input_function: InputFunction,
    /// Activation over the collected inputs
    pub transfer_function: TransferFunction,
    /// State blend over the activation and the previous output
    pub spike_function: SpikeFunction,
    /// Input source intervals
    pub input_synapses: SmallVec<[InputSynapse; 2]>,
    /// Owned weight table intervals
    pub weight_synapses: SmallVec<[WeightSynapse; 1]>,
}

impl Neuron {
    /// Total number of inputs across every input synapse
    pub fn input_count(&self) -> u32 {
        self.input_synapses.iter().map(|s| s.size).sum()
    }

    /// Total number of owned weights across every weight synapse
    pub fn weight_count(&self) -> u32 {
        self.weight_synapses.iter().map(|s| s.size).sum()
    }

    /// Number of bias weights: everything after the spike weight and the
    /// per-input weights
    pub fn bias_count(&self) -> u32 {
        self.weight_count().saturating_sub(1 + self.input_count())
    }

    /// Decode the nth input reference together with its temporal offset
    pub fn input_ref(&self, n: u32) -> Option<(InputRef, u32)> {
        let mut remaining = n;
        for synapse in &self.input_synapses {
            if remaining < synapse.size {
                return Some((synapse.nth(remaining), synapse.reach_past));
            }
            remaining -= synapse.size;
        }
        None
    }

    /// Resolve the nth owned weight into a weight table index
    pub fn weight_index(&self, n: u32) -> Option<u32> {
        let mut remaining = n;
        for synapse in &self.weight_synapses {
            if remaining < synapse.size {
                return Some(synapse.start + remaining);
            }
            remaining -= synapse.size;
        }
        None
    }

    /// Weight table index of the spike parameter (the first owned weight)
    pub fn spike_weight_index(&self) -> Option<u32> {
        self.weight_index(0)
    }

    /// Iterate every decoded input reference with its temporal offset
    pub fn iter_input_refs(&self) -> impl Iterator<Item = (InputRef, u32)> + '_ {
        self.input_synapses
            .iter()
            .flat_map(|synapse| (0..synapse.size).map(|n| (synapse.nth(n), synapse.reach_past)))
    }

    /// Iterate every owned weight table index
    pub fn iter_weight_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.weight_synapses
            .iter()
            .flat_map(|synapse| synapse.start..(synapse.start + synapse.size))
    }
}

/// The full layered network descriptor
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NeuronNetwork {
    input_size: u32,
    memory_size: u32,
    output_count: u32,
    weights: Vec<f64>,
    neurons: Vec<Neuron>,
    feature_groups: Vec<FeatureGroup>,
}

impl NeuronNetwork {
    /// Assemble a descriptor from its parts, validating the structural invariants
    pub fn new(
        input_size: u32,
        memory_size: u32,
        output_count: u32,
        weights: Vec<f64>,
        neurons: Vec<Neuron>,
        feature_groups: Vec<FeatureGroup>,
    ) -> Result<Self> {
        let network = Self {
            input_size,
            memory_size,
            output_count,
            weights,
            neurons,
            feature_groups,
        };
        network.validate()?;
        Ok(network)
    }

    /// Declared network input vector length
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Maximum past-loop count any synapse of the network reaches
    pub fn memory_size(&self) -> u32 {
        self.memory_size
    }

    /// Number of output neurons at the tail of the neuron array
    pub fn output_count(&self) -> u32 {
        self.output_count
    }

    /// Number of neurons
    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    /// Number of weight table slots
    pub fn weight_count(&self) -> usize {
        self.weights.len()
    }

    /// Index of the first output neuron
    pub fn first_output_neuron(&self) -> u32 {
        (self.neurons.len() - self.output_count as usize) as u32
    }

    /// Access a neuron by index
    pub fn neuron(&self, index: u32) -> &Neuron {
        &self.neurons[index as usize]
    }

    /// All neurons in array order
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// One weight table slot
    pub fn weight(&self, index: u32) -> f64 {
        self.weights[index as usize]
    }

    /// The whole weight table
    pub fn weight_table(&self) -> &[f64] {
        &self.weights
    }

    /// Mutable access to the weight table; the optimiser is the single writer
    pub fn weight_table_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Feature groups decorating the network
    pub fn feature_groups(&self) -> &[FeatureGroup] {
        &self.feature_groups
    }

    /// Verify every structural invariant of the descriptor
    pub fn validate(&self) -> Result<()> {
        if self.output_count == 0 || self.output_count as usize > self.neurons.len() {
            return Err(CoreError::invalid_parameter(
                "output_count",
                self.output_count.to_string(),
                format!("within [1, {}]", self.neurons.len()),
            ));
        }

        let mut weight_owned = vec![false; self.weights.len()];
        for (index, neuron) in self.neurons.iter().enumerate() {
            let neuron_index = index as u32;
            for synapse in &neuron.input_synapses {
                if synapse.size == 0 {
                    return Err(CoreError::EmptySynapse { neuron_index });
                }
                if synapse.reach_past > self.memory_size {
                    return Err(CoreError::invalid_topology(format!(
                        "neuron {} reaches {} steps into the past, memory size is {}",
                        neuron_index, synapse.reach_past, self.memory_size
                    )));
                }
            }
            for synapse in &neuron.weight_synapses {
                if synapse.size == 0 {
                    return Err(CoreError::EmptySynapse { neuron_index });
                }
            }

            // spike weight + one weight per input + at least one bias
            if neuron.weight_count() < neuron.input_count() + 2 {
                return Err(CoreError::weight_table(format!(
                    "neuron {} owns {} weights for {} inputs; spike weight and bias are mandatory",
                    neuron_index,
                    neuron.weight_count(),
                    neuron.input_count()
                )));
            }

            for (input, reach_past) in neuron.iter_input_refs() {
                match input {
                    InputRef::Network(input_index) => {
                        if input_index >= self.input_size {
                            return Err(CoreError::InputOutOfBounds {
                                neuron_index,
                                input_index,
                                input_size: self.input_size,
                            });
                        }
                        if reach_past != 0 {
                            return Err(CoreError::invalid_topology(format!(
                                "neuron {} reads network input {} from the past",
                                neuron_index, input_index
                            )));
                        }
                    }
                    InputRef::Neuron(other) => {
                        if other as usize >= self.neurons.len() {
                            return Err(CoreError::invalid_topology(format!(
                                "neuron {} references missing neuron {}",
                                neuron_index, other
                            )));
                        }
                        if reach_past == 0 && other >= neuron_index {
                            return Err(CoreError::invalid_topology(format!(
                                "neuron {} takes a same-step input from neuron {}; only earlier neurons may feed forward",
                                neuron_index, other
                            )));
                        }
                    }
                }
            }

            for weight_index in neuron.iter_weight_indices() {
                let slot = weight_owned.get_mut(weight_index as usize).ok_or_else(|| {
                    CoreError::weight_table(format!(
                        "neuron {} references weight {} outside the table of {}",
                        neuron_index,
                        weight_index,
                        self.weights.len()
                    ))
                })?;
                if *slot {
                    return Err(CoreError::weight_table(format!(
                        "weight {} is owned by more than one neuron",
                        weight_index
                    )));
                }
                *slot = true;
            }
        }

        for group in &self.feature_groups {
            for neuron_index in group.iter_neurons() {
                if neuron_index as usize >= self.neurons.len() {
                    return Err(CoreError::invalid_topology(format!(
                        "feature group references missing neuron {}",
                        neuron_index
                    )));
                }
            }
        }

        Ok(())
    }
}
