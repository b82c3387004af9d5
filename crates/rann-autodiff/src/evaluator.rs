//! Dataset-wide evaluation of a network through its operation graph
//!
//! Each evaluation context owns its own data store, so several contexts
//! (training, testing) can coexist over one graph without sharing state.

use rand::rngs::StdRng;
use rand::Rng;

use rann_core::{FeatureKind, NeuronNetwork, TrainingSettings};
use rann_data::{BackpropDataStore, DatasetView};

use crate::graph::OperationGraph;
use crate::objective::Objective;

/// Evaluation context: one data store plus the error assembly logic
#[derive(Debug)]
pub struct NetworkEvaluator {
    store: BackpropDataStore,
}

impl NetworkEvaluator {
    /// Create an evaluation context for a network/graph pair
    pub fn new(network: &NeuronNetwork, graph: &OperationGraph, sequence_size: usize) -> Self {
        let mut store = BackpropDataStore::new(network.memory_size(), network.weight_count());
        store.build(
            graph.operations().len(),
            graph.weight_relevant_operation_count(),
            sequence_size,
        );
        Self { store }
    }

    /// Error over the whole dataset: objective error plus the penalties of
    /// the performance-relevant feature groups
    #[allow(clippy::too_many_arguments)]
    pub fn full_error(
        &mut self,
        graph: &mut OperationGraph,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        objective: &Objective,
        dataset: &dyn DatasetView,
        rng: &mut StdRng,
    ) -> f64 {
        self.error_in_window(
            graph,
            network,
            settings,
            objective,
            dataset,
            0,
            dataset.number_of_sequences(),
            rng,
        )
    }

    /// Error over a random minibatch-sized window of sequences
    #[allow(clippy::too_many_arguments)]
    pub fn stochastic_error(
        &mut self,
        graph: &mut OperationGraph,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        objective: &Objective,
        dataset: &dyn DatasetView,
        rng: &mut StdRng,
    ) -> f64 {
        let sequences = dataset.number_of_sequences();
        let window = (settings.minibatch_size as usize).min(sequences);
        let start = if sequences > window {
            rng.gen_range(0..=(sequences - window))
        } else {
            0
        };
        self.error_in_window(
            graph, network, settings, objective, dataset, start, window, rng,
        )
    }

    /// Error over `sequence_count` sequences starting at `start_sequence`
    #[allow(clippy::too_many_arguments)]
    pub fn error_in_window(
        &mut self,
        graph: &mut OperationGraph,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        objective: &Objective,
        dataset: &dyn DatasetView,
        start_sequence: usize,
        sequence_count: usize,
        rng: &mut StdRng,
    ) -> f64 {
        let sequence_size = dataset.sequence_size();
        let label_count = sequence_count * sequence_size;
        let mut error_sum = 0.0;

        for sequence_index in start_sequence..(start_sequence + sequence_count) {
            let mut input_index = sequence_index * dataset.inputs_in_one_sequence();
            let mut label_index = sequence_index * sequence_size;

            self.store.reset();
            graph.reset_processed();
            for _ in 0..dataset.prefill_inputs_number() {
                self.store.step();
                graph.calculate_value(
                    network,
                    settings,
                    &mut self.store,
                    dataset.get_input_sample(input_index),
                    false,
                    rng,
                );
                input_index += 1;
            }
            for _ in 0..sequence_size {
                self.store.step();
                graph.calculate_value(
                    network,
                    settings,
                    &mut self.store,
                    dataset.get_input_sample(input_index),
                    false,
                    rng,
                );
                let outputs = self.read_outputs(graph);
                error_sum += objective.sample_error(
                    dataset.get_label_sample(label_index),
                    &outputs,
                    label_count,
                );
                input_index += 1;
                label_index += 1;
            }
        }

        error_sum + feature_penalties(network, label_count)
    }

    /// Spike values of the output neurons for the current step
    pub fn read_outputs(&self, graph: &OperationGraph) -> Vec<f64> {
        graph
            .output_spike_indices()
            .iter()
            .map(|&spike| self.store.get_value(0, spike as usize))
            .collect()
    }

    /// The data store owned by this context
    pub fn store_mut(&mut self) -> &mut BackpropDataStore {
        &mut self.store
    }
}

/// Penalty contribution of the performance-relevant feature groups,
/// averaged over the evaluated label count
fn feature_penalties(network: &NeuronNetwork, label_count: usize) -> f64 {
    if label_count == 0 {
        return 0.0;
    }
    let mut penalty = 0.0;
    for group in network.feature_groups() {
        let group_sum: f64 = match group.kind {
            FeatureKind::L1Regularization => group
                .iter_neurons()
                .flat_map(|neuron| network.neuron(neuron).iter_weight_indices())
                .map(|weight| network.weight(weight).abs())
                .sum(),
            FeatureKind::L2Regularization => group
                .iter_neurons()
                .flat_map(|neuron| network.neuron(neuron).iter_weight_indices())
                .map(|weight| network.weight(weight).powi(2))
                .sum(),
            _ => 0.0,
        };
        penalty += group_sum;
    }
    penalty / label_count as f64
}
