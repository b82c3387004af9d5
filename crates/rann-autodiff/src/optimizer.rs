//! Autodiff training optimiser
//!
//! One iteration picks a minibatch of sequences and a random truncation
//! window, runs the forward and backward sweeps for every step of every
//! picked sequence, folds the windowed sequence derivatives into one average
//! per weight and applies the weight update. Train and test errors refresh
//! on a configurable cadence between iterations.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rann_core::{NeuronNetwork, TrainingSettings, TrainingStrategy};
use rann_data::{BackpropDataStore, DatasetView};

use crate::error::{GraphError, Result};
use crate::evaluator::NetworkEvaluator;
use crate::graph::{GraphBuilder, OperationGraph};
use crate::objective::Objective;
use crate::updater::WeightUpdater;

/// Shared handle to a dataset usable across worker threads
pub type DatasetHandle = Arc<dyn DatasetView + Send + Sync>;

/// Trains a network through its reverse-mode autodiff graph
pub struct AutodiffOptimizer {
    settings: TrainingSettings,
    objective: Objective,
    network: NeuronNetwork,
    graph: OperationGraph,
    store: BackpropDataStore,
    train_set: DatasetHandle,
    test_set: Option<DatasetHandle>,
    train_evaluator: NetworkEvaluator,
    test_evaluator: Option<NetworkEvaluator>,
    updater: WeightUpdater,
    avg_derivatives: Vec<f64>,
    rng: StdRng,
    iteration: u32,
    last_training_error: f64,
    last_testing_error: f64,
    min_test_error: f64,
    min_test_error_iteration: u32,
    last_tested_iteration: u32,
    used_minibatch_size: usize,
    used_truncation: usize,
}

impl AutodiffOptimizer {
    /// Build the operation graph and data store for the given network and
    /// training set
    pub fn new(
        network: NeuronNetwork,
        objective: Objective,
        train_set: DatasetHandle,
        settings: TrainingSettings,
    ) -> Result<Self> {
        let sequence_size = train_set.sequence_size();
        let graph = GraphBuilder::new(&network, &settings, train_set.number_of_label_samples())
            .build()?;
        let mut store = BackpropDataStore::new(network.memory_size(), network.weight_count());
        store.build(
            graph.operations().len(),
            graph.weight_relevant_operation_count(),
            sequence_size,
        );
        let train_evaluator = NetworkEvaluator::new(&network, &graph, sequence_size);

        let used_minibatch_size =
            (settings.minibatch_size as usize).min(train_set.number_of_sequences());
        let used_truncation = if settings.memory_truncation == 0 {
            sequence_size
        } else {
            (settings.memory_truncation as usize).min(sequence_size)
        };
        let rng = match settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let weight_count = network.weight_count();

        Ok(Self {
            settings,
            objective,
            network,
            graph,
            store,
            train_set,
            test_set: None,
            train_evaluator,
            test_evaluator: None,
            updater: WeightUpdater::default_rule(),
            avg_derivatives: vec![0.0; weight_count],
            rng,
            iteration: 0,
            last_training_error: f64::INFINITY,
            last_testing_error: f64::INFINITY,
            min_test_error: f64::INFINITY,
            min_test_error_iteration: 0,
            last_tested_iteration: 0,
            used_minibatch_size,
            used_truncation,
        })
    }

    /// Attach a test dataset, enabling test-error tracking and early stopping
    pub fn set_test_set(&mut self, test_set: DatasetHandle) -> Result<()> {
        if test_set.sequence_size() != self.train_set.sequence_size() {
            return Err(GraphError::InvalidTrainingWindow {
                reason: format!(
                    "test sequence size {} differs from training sequence size {}",
                    test_set.sequence_size(),
                    self.train_set.sequence_size()
                ),
            });
        }
        self.test_evaluator = Some(NetworkEvaluator::new(
            &self.network,
            &self.graph,
            test_set.sequence_size(),
        ));
        self.test_set = Some(test_set);
        Ok(())
    }

    /// Run one training iteration
    pub fn iterate(&mut self) -> Result<()> {
        let sequences = self.train_set.number_of_sequences();
        let sequence_size = self.train_set.sequence_size();
        if self.used_minibatch_size == 0 || sequences < self.used_minibatch_size {
            return Err(GraphError::InvalidTrainingWindow {
                reason: format!(
                    "minibatch of {} cannot be drawn from {} sequences",
                    self.used_minibatch_size, sequences
                ),
            });
        }

        let sequence_start = if sequences > self.used_minibatch_size {
            self.rng.gen_range(0..=(sequences - self.used_minibatch_size))
        } else {
            0
        };
        let truncation_start = if sequence_size > self.used_truncation {
            self.rng.gen_range(0..=(sequence_size - self.used_truncation))
        } else {
            0
        };

        for sequence_index in sequence_start..(sequence_start + self.used_minibatch_size) {
            let mut input_index = sequence_index * self.train_set.inputs_in_one_sequence();
            let mut label_index = sequence_index * sequence_size;

            self.store.reset();
            self.graph.reset_processed();
            // the first few inputs only set up an initial network state
            for _ in 0..self.train_set.prefill_inputs_number() {
                self.store.step();
                let input = self.train_set.get_input_sample(input_index);
                self.graph.calculate_value(
                    &self.network,
                    &self.settings,
                    &mut self.store,
                    input,
                    true,
                    &mut self.rng,
                );
                input_index += 1;
            }
            for step in 0..sequence_size {
                self.store.step();
                // derivatives accumulate only inside the truncation window
                self.store.set_weight_derivative_update(
                    step >= truncation_start && step < truncation_start + self.used_truncation,
                );
                let input = self.train_set.get_input_sample(input_index);
                let labels = self.train_set.get_label_sample(label_index);
                self.graph.calculate_value(
                    &self.network,
                    &self.settings,
                    &mut self.store,
                    input,
                    true,
                    &mut self.rng,
                );
                self.graph.calculate_derivative(
                    &self.network,
                    &self.settings,
                    &self.objective,
                    &mut self.store,
                    input,
                    labels,
                );
                input_index += 1;
                label_index += 1;
            }
        }

        self.avg_derivatives.fill(0.0);
        for position in truncation_start..(truncation_start + self.used_truncation) {
            for (weight_index, average) in self.avg_derivatives.iter_mut().enumerate() {
                *average = (*average
                    + self
                        .store
                        .get_average_derivative(position as u32, weight_index))
                    / 2.0;
            }
        }
        debug_assert!(
            self.avg_derivatives.iter().any(|&value| value != 0.0),
            "a training iteration produced no gradient at all"
        );

        self.apply_weight_update();
        self.iteration += 1;
        self.update_context_errors();
        log::debug!(
            "iteration {}: training error {}, testing error {}",
            self.iteration,
            self.last_training_error,
            self.last_testing_error
        );
        Ok(())
    }

    /// Whether any enabled stop strategy has triggered
    pub fn stop_triggered(&self) -> bool {
        let mut stop = false;
        if self
            .settings
            .has_training_strategy(TrainingStrategy::STOP_IF_TRAINING_ERROR_ZERO)
        {
            stop |= self.last_training_error == 0.0;
        }
        if self
            .settings
            .has_training_strategy(TrainingStrategy::STOP_IF_TRAINING_ERROR_BELOW_LEARNING_RATE)
        {
            stop |= self.last_training_error.is_finite()
                && self.last_training_error.abs() < self.settings.learning_rate(self.iteration);
        }
        if self
            .settings
            .has_training_strategy(TrainingStrategy::EARLY_STOPPING)
            && self.min_test_error.is_finite()
        {
            stop |= self.last_testing_error
                > (1.0 + self.settings.delta) * self.min_test_error;
        }
        stop
    }

    /// Forward-only pass over one input, returning the network outputs
    ///
    /// Supports inference through the trained graph; no derivative state is
    /// touched.
    pub fn step_with_input(&mut self, input: &[f64]) -> Vec<f64> {
        self.store.step();
        self.graph.calculate_value(
            &self.network,
            &self.settings,
            &mut self.store,
            input,
            false,
            &mut self.rng,
        );
        self.graph
            .output_spike_indices()
            .iter()
            .map(|&spike| self.store.get_value(0, spike as usize))
            .collect()
    }

    /// Clear the propagation state before an unrelated sequence
    pub fn reset(&mut self) {
        self.store.reset();
        self.graph.reset_processed();
    }

    /// Swap the update rule; running state of the previous rule is dropped
    pub fn set_weight_updater(&mut self, updater: WeightUpdater) {
        self.updater = updater;
    }

    fn apply_weight_update(&mut self) {
        let learning_rate = self.settings.learning_rate(self.iteration);
        self.updater.apply(
            self.network.weight_table_mut(),
            &self.avg_derivatives,
            learning_rate,
        );
    }

    fn update_context_errors(&mut self) {
        let cadence = self.settings.tolerance_loop_value.max(1);
        if self.iteration % cadence == 0 {
            self.last_training_error = self.train_evaluator.stochastic_error(
                &mut self.graph,
                &self.network,
                &self.settings,
                &self.objective,
                self.train_set.as_ref(),
                &mut self.rng,
            );
        }
        if let (Some(test_set), Some(test_evaluator)) =
            (&self.test_set, &mut self.test_evaluator)
        {
            let overdue = self.iteration > self.last_tested_iteration + cadence;
            let diverging = self.last_testing_error.is_finite()
                && self.last_training_error.is_finite()
                && (self.last_testing_error * self.settings.delta)
                    < (self.last_training_error - self.last_testing_error).abs();
            if overdue || diverging {
                self.last_testing_error = test_evaluator.full_error(
                    &mut self.graph,
                    &self.network,
                    &self.settings,
                    &self.objective,
                    test_set.as_ref(),
                    &mut self.rng,
                );
                if self.last_testing_error < self.min_test_error {
                    self.min_test_error = self.last_testing_error;
                    self.min_test_error_iteration = self.iteration;
                }
                self.last_tested_iteration = self.iteration;
            }
        }
    }

    /// Number of completed training iterations
    pub fn current_iteration(&self) -> u32 {
        self.iteration
    }

    /// Training error at the last refresh
    pub fn last_training_error(&self) -> f64 {
        self.last_training_error
    }

    /// Testing error at the last refresh
    pub fn last_testing_error(&self) -> f64 {
        self.last_testing_error
    }

    /// Best testing error seen so far
    pub fn min_test_error(&self) -> f64 {
        self.min_test_error
    }

    /// Iteration at which the best testing error was seen
    pub fn min_test_error_iteration(&self) -> u32 {
        self.min_test_error_iteration
    }

    /// Combined estimate of the current error level
    pub fn error_estimation(&self) -> f64 {
        if self.last_testing_error.is_finite() {
            (self.last_training_error + self.last_testing_error) / 2.0
        } else {
            self.last_training_error
        }
    }

    /// The trained network
    pub fn network(&self) -> &NeuronNetwork {
        &self.network
    }

    /// Give up the optimiser and keep the trained network
    pub fn into_network(self) -> NeuronNetwork {
        self.network
    }

    /// The operation graph driving the sweeps
    pub fn graph(&self) -> &OperationGraph {
        &self.graph
    }

    /// The settings the optimiser runs under
    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }
}
