//! The operation graph and its forward/backward sweeps
//!
//! Operations are linearised into an array in execution order: index zero
//! holds the first objective, higher indices sit deeper toward the inputs.
//! Forward value computation therefore iterates from the highest index down
//! to zero, and because every node's derivative is a closed-form combination
//! of its own inputs' derivatives (which live at higher indices), the
//! backward sweep runs the same direction for each differentiated weight.

pub mod builder;
pub mod ops;

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use rann_core::{FeatureKind, NeuronNetwork, TrainingSettings};
use rann_data::BackpropDataStore;

use crate::objective::Objective;
use crate::waves::WavePlan;

pub use builder::GraphBuilder;
pub use ops::{DependencyParameter, OpHandle, OpKind, OpTag, Operation, PENDING_PLACEMENT};

/// The linearised autodiff operation graph of one network
#[derive(Debug, Clone)]
pub struct OperationGraph {
    operations: Vec<Operation>,
    weight_relevant_count: usize,
    sample_count: usize,
    spike_index_of_neuron: HashMap<u32, u32>,
    output_spikes: Vec<u32>,
}

impl OperationGraph {
    pub(crate) fn from_parts(
        operations: Vec<Operation>,
        weight_relevant_count: usize,
        sample_count: usize,
        spike_index_of_neuron: HashMap<u32, u32>,
        output_spikes: Vec<u32>,
    ) -> Self {
        Self {
            operations,
            weight_relevant_count,
            sample_count,
            spike_index_of_neuron,
            output_spikes,
        }
    }

    /// The operations in execution order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Number of leading operations whose derivatives feed the sequence
    /// averages (objectives plus performance features)
    pub fn weight_relevant_operation_count(&self) -> usize {
        self.weight_relevant_count
    }

    /// Label sample count the objectives aggregate over
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Execution index of a neuron's spike operation
    pub fn spike_index_of(&self, neuron_index: u32) -> Option<u32> {
        self.spike_index_of_neuron.get(&neuron_index).copied()
    }

    /// Execution indices of the output neurons' spikes, in output order
    pub fn output_spike_indices(&self) -> &[u32] {
        &self.output_spikes
    }

    /// Clear the per-step processed flags
    pub fn reset_processed(&mut self) {
        for op in &mut self.operations {
            op.value_processed = false;
            op.derivative_processed = false;
        }
    }

    /// Forward sweep: compute every operation value for the current step
    ///
    /// `training` switches the dropout features on; evaluation passes leave
    /// them out entirely so repeated passes stay bit-identical.
    pub fn calculate_value(
        &mut self,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        store: &mut BackpropDataStore,
        input: &[f64],
        training: bool,
        rng: &mut StdRng,
    ) {
        for index in (0..self.operations.len()).rev() {
            self.execute_value_at(index, network, settings, store, input, training, rng);
            self.operations[index].value_processed = true;
        }
    }

    /// Forward sweep over an explicit operation order
    ///
    /// Every permutation that keeps each operation after its dependencies
    /// (for the backwards execution direction: before lower indices) yields
    /// identical buffer contents; wave scheduling relies on exactly that.
    pub fn calculate_value_ordered(
        &mut self,
        order: &[u32],
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        store: &mut BackpropDataStore,
        input: &[f64],
        training: bool,
        rng: &mut StdRng,
    ) {
        for &index in order {
            self.execute_value_at(
                index as usize,
                network,
                settings,
                store,
                input,
                training,
                rng,
            );
            self.operations[index as usize].value_processed = true;
        }
    }

    /// Forward sweep over a wave plan: bulk-synchronous within each wave
    ///
    /// Every wave's scalar operations are computed concurrently against the
    /// pre-wave buffer state and written back together, which doubles as a
    /// barrier between waves. Bulk features and the penalty refreshes run
    /// at the head of their wave on a single worker.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_value_waves(
        &mut self,
        plan: &WavePlan,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        store: &mut BackpropDataStore,
        input: &[f64],
        training: bool,
        rng: &mut StdRng,
    ) {
        for wave in plan.waves() {
            let mut scalar_ops: Vec<u32> = Vec::with_capacity(wave.len());
            for &index in wave {
                match self.operations[index as usize].tag() {
                    OpTag::SolutionFeature | OpTag::WeightRegularization => {
                        self.execute_value_at(
                            index as usize,
                            network,
                            settings,
                            store,
                            input,
                            training,
                            rng,
                        );
                        self.operations[index as usize].value_processed = true;
                    }
                    _ => scalar_ops.push(index),
                }
            }

            let operations = &self.operations;
            let compute = |&index: &u32| {
                operations[index as usize]
                    .compute_value(index as usize, network, settings, store, input)
                    .map(|value| (index as usize, value))
            };
            #[cfg(feature = "parallel")]
            let computed: Vec<(usize, f64)> =
                scalar_ops.par_iter().filter_map(compute).collect();
            #[cfg(not(feature = "parallel"))]
            let computed: Vec<(usize, f64)> =
                scalar_ops.iter().filter_map(compute).collect();

            for (index, value) in computed {
                store.set_value(index, value);
            }
            for index in scalar_ops {
                self.operations[index as usize].value_processed = true;
            }
        }
    }

    fn execute_value_at(
        &mut self,
        index: usize,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        store: &mut BackpropDataStore,
        input: &[f64],
        training: bool,
        rng: &mut StdRng,
    ) {
        match self.operations[index].tag() {
            OpTag::WeightRegularization => {
                if let OpKind::WeightRegularization(reg) = &mut self.operations[index].kind {
                    // L2 derivatives follow the weights, so every step
                    // refreshes them; L1 stays constant until the structure
                    // changes
                    if network.feature_groups()[reg.feature_group_index as usize].kind
                        == FeatureKind::L2Regularization
                    {
                        reg.refresh(network);
                    }
                }
            }
            OpTag::SolutionFeature => {
                if let OpKind::SolutionFeature(feature) = &self.operations[index].kind {
                    execute_solution_feature(feature, store, settings, training, rng);
                }
            }
            _ => {
                let value = self.operations[index]
                    .compute_value(index, network, settings, store, input);
                if let Some(value) = value {
                    store.set_value(index, value);
                }
            }
        }
    }

    /// Backward sweep: derivatives of every operation for every weight
    ///
    /// Parallelises across the weight dimension: each worker owns a
    /// contiguous slice of weight indices and walks the whole operation
    /// array for its slice, because derivative cells of distinct weights
    /// never alias.
    pub fn calculate_derivative(
        &mut self,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        objective: &Objective,
        store: &mut BackpropDataStore,
        input: &[f64],
        labels: &[f64],
    ) {
        let operations = &self.operations;
        let sample_count = self.sample_count as f64;
        store.sweep_weights(|mut column, values| {
            for index in (0..operations.len()).rev() {
                if let Some(derivative) = operations[index].compute_derivative(
                    index,
                    network,
                    settings,
                    objective,
                    sample_count,
                    input,
                    labels,
                    &column,
                    values,
                ) {
                    column.set_derivative(index, derivative);
                }
            }
        });
        for op in &mut self.operations {
            op.derivative_processed = true;
        }
    }
}

/// Execute one solution feature over the spike values of its group
fn execute_solution_feature(
    feature: &ops::SolutionFeatureOp,
    store: &mut BackpropDataStore,
    settings: &TrainingSettings,
    training: bool,
    rng: &mut StdRng,
) {
    match feature.kind {
        FeatureKind::Softmax => {
            let mut max_value = f64::NEG_INFINITY;
            for &spike in &feature.spike_ops {
                max_value = max_value.max(store.get_value(0, spike as usize));
            }
            let mut sum = 0.0;
            for &spike in &feature.spike_ops {
                sum += (store.get_value(0, spike as usize) - max_value).exp();
            }
            if sum > 0.0 {
                for &spike in &feature.spike_ops {
                    let scaled = (store.get_value(0, spike as usize) - max_value).exp() / sum;
                    store.set_value(spike as usize, scaled);
                }
            }
        }
        FeatureKind::Dropout => {
            if training && settings.dropout_probability > 0.0 {
                for &spike in &feature.spike_ops {
                    if rng.gen::<f64>() < settings.dropout_probability {
                        store.set_value(spike as usize, 0.0);
                    }
                }
            }
        }
        // recurrence and the penalty features have no forward execution
        _ => {}
    }
}
