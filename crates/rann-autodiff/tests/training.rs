//! End-to-end training behaviour of the autodiff optimiser

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use rann_autodiff::{
    AutodiffOptimizer, CostFunction, GraphBuilder, NetworkEvaluator, Objective, WeightUpdater,
};
use rann_core::{
    FeatureKind, NetworkBuilder, NeuronNetwork, SpikeFunction, TrainingSettings,
    TrainingStrategy, TransferFunction,
};
use rann_data::{DatasetImplementation, DatasetView};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn constant_dataset(x: f64, y: f64, samples: usize) -> DatasetImplementation {
    DatasetImplementation::new(vec![vec![x]; samples], vec![vec![y]; samples], 1).unwrap()
}

fn linear_single_neuron(seed: u64, expected_input_range: f64) -> NeuronNetwork {
    NetworkBuilder::new()
        .input_size(1)
        .seed(seed)
        .expected_input_range(expected_input_range)
        .set_neuron_transfer_function(0, 0, TransferFunction::Identity)
        .set_neuron_spike_function(0, 0, SpikeFunction::None)
        .dense_layers(&[1])
        .unwrap()
}

fn training_settings() -> TrainingSettings {
    TrainingSettings::default()
        .with_learning_rate(0.1)
        .with_minibatch_size(8)
        .with_memory_truncation(1)
        .with_tolerance_loop_value(1)
        .with_dropout_probability(0.0)
        .unwrap()
        .with_seed(1234)
}

#[test]
fn constant_regression_converges_to_the_target() {
    init_logging();
    let network = linear_single_neuron(800, 1.0);
    let optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(constant_dataset(1.0, 3.0, 8)),
        training_settings(),
    );
    let mut optimizer = optimizer.unwrap();

    for _ in 0..300 {
        optimizer.iterate().unwrap();
    }

    let network = optimizer.network();
    let neuron = network.neuron(0);
    let input_weight = network.weight(neuron.weight_index(1).unwrap());
    let bias = network.weight(neuron.weight_index(2).unwrap());
    assert!(
        (input_weight + bias - 3.0).abs() < 0.05,
        "network settled at {} instead of 3.0",
        input_weight + bias
    );
    assert!(optimizer.last_training_error() < 1e-3);
}

#[test]
fn bias_carries_the_signal_when_the_input_is_silent() {
    // with x = 0 the input weight receives no gradient at all
    let network = linear_single_neuron(801, 32.0);
    let neuron = network.neuron(0);
    let initial_input_weight = network.weight(neuron.weight_index(1).unwrap());
    let mut optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(constant_dataset(0.0, 3.0, 8)),
        training_settings(),
    )
    .unwrap();

    for _ in 0..400 {
        optimizer.iterate().unwrap();
    }

    let network = optimizer.network();
    let neuron = network.neuron(0);
    let input_weight = network.weight(neuron.weight_index(1).unwrap());
    let bias = network.weight(neuron.weight_index(2).unwrap());
    assert!((bias - 3.0).abs() < 0.05, "bias settled at {}", bias);
    assert!(input_weight.abs() < 0.5);
    assert_eq!(input_weight.to_bits(), initial_input_weight.to_bits());
}

#[test]
fn momentum_updates_also_converge_on_the_regression_target() {
    let network = linear_single_neuron(810, 1.0);
    let mut optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(constant_dataset(1.0, 3.0, 8)),
        training_settings(),
    )
    .unwrap();
    let updater =
        WeightUpdater::momentum(optimizer.settings(), optimizer.network().weight_count());
    optimizer.set_weight_updater(updater);

    for _ in 0..300 {
        optimizer.iterate().unwrap();
    }

    let network = optimizer.network();
    let neuron = network.neuron(0);
    let output = network.weight(neuron.weight_index(1).unwrap())
        + network.weight(neuron.weight_index(2).unwrap());
    assert!(
        (output - 3.0).abs() < 0.05,
        "momentum training settled at {}",
        output
    );
}

#[test]
fn training_stops_once_the_error_drops_below_the_learning_rate() {
    let network = linear_single_neuron(802, 1.0);
    let settings = training_settings().with_training_strategy(
        TrainingStrategy::STOP_IF_TRAINING_ERROR_BELOW_LEARNING_RATE,
        true,
    );
    let mut optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(constant_dataset(1.0, 3.0, 8)),
        settings,
    )
    .unwrap();

    let mut iterations = 0;
    while !optimizer.stop_triggered() && iterations < 2000 {
        optimizer.iterate().unwrap();
        iterations += 1;
    }
    assert!(
        optimizer.stop_triggered(),
        "stop strategy never fired within {} iterations",
        iterations
    );
    assert!(optimizer.last_training_error() < 0.1);
}

#[test]
fn recurrent_sequence_training_reduces_the_error() {
    init_logging();
    // two binary input streams, label: their running sum modulo two
    let sequence_size = 4;
    let mut inputs = Vec::new();
    let mut labels = Vec::new();
    for pattern in 0u32..8 {
        let mut carry = 0u32;
        for step in 0..sequence_size {
            let a = (pattern >> step) & 1;
            let b = (pattern >> ((step + 1) % sequence_size)) & 1;
            inputs.push(vec![a as f64, b as f64]);
            carry = (carry + a + b) % 2;
            labels.push(vec![carry as f64]);
        }
    }
    let dataset = DatasetImplementation::new(inputs, labels, sequence_size).unwrap();

    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(900)
        .allowed_transfer_functions_by_layer(vec![
            vec![TransferFunction::Sigmoid],
            vec![TransferFunction::Sigmoid],
        ])
        .allowed_spike_functions(vec![SpikeFunction::None])
        .add_feature_to_layer(0, FeatureKind::BoltzmannKnot)
        .dense_layers(&[2, 1])
        .unwrap();
    assert_eq!(network.memory_size(), 1);

    let settings = TrainingSettings::default()
        .with_learning_rate(0.2)
        .with_minibatch_size(8)
        .with_memory_truncation(0)
        .with_tolerance_loop_value(1)
        .with_dropout_probability(0.0)
        .unwrap()
        .with_seed(77);
    let mut optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(dataset),
        settings,
    )
    .unwrap();

    optimizer.iterate().unwrap();
    let initial_error = optimizer.last_training_error();
    for _ in 0..300 {
        optimizer.iterate().unwrap();
    }
    let final_error = optimizer.last_training_error();
    assert!(final_error.is_finite());
    assert!(
        final_error < initial_error,
        "error went from {} to {}",
        initial_error,
        final_error
    );
}

#[test]
fn disabled_dropout_keeps_forward_passes_bit_identical() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(55)
        .add_feature_to_layer(0, FeatureKind::Dropout)
        .dense_layers(&[3, 1])
        .unwrap();
    let settings = TrainingSettings::default()
        .with_dropout_probability(0.0)
        .unwrap()
        .with_seed(4);
    let mut optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(constant_dataset_two_inputs()),
        settings,
    )
    .unwrap();

    optimizer.reset();
    let first = optimizer.step_with_input(&[0.3, -0.8]);
    optimizer.reset();
    let second = optimizer.step_with_input(&[0.3, -0.8]);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

fn constant_dataset_two_inputs() -> DatasetImplementation {
    DatasetImplementation::new(vec![vec![0.5, 0.5]; 4], vec![vec![1.0]; 4], 1).unwrap()
}

#[test]
fn l2_regularisation_adds_exactly_the_scaled_weight_square_sum() {
    let build = |with_feature: bool| -> NeuronNetwork {
        let mut builder = NetworkBuilder::new().input_size(2).seed(1000);
        if with_feature {
            builder = builder.add_feature_to_layer(1, FeatureKind::L2Regularization);
        }
        builder.dense_layers(&[2, 2]).unwrap()
    };
    let regularised = build(true);
    let plain = build(false);
    // the feature draws no randomness, so both networks share their weights
    assert_eq!(regularised.weight_table(), plain.weight_table());

    let dataset = DatasetImplementation::new(
        vec![vec![0.1, 0.9], vec![0.8, 0.2], vec![0.4, 0.4], vec![0.6, 0.7]],
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5], vec![1.0, 1.0]],
        1,
    )
    .unwrap();
    let settings = TrainingSettings::default()
        .with_dropout_probability(0.0)
        .unwrap();
    let objective = Objective::new(CostFunction::MeanSquaredError);

    let evaluate = |network: &NeuronNetwork| -> f64 {
        let mut graph = GraphBuilder::new(network, &settings, dataset.number_of_label_samples())
            .build()
            .unwrap();
        let mut evaluator = NetworkEvaluator::new(network, &graph, dataset.sequence_size());
        let mut rng = StdRng::seed_from_u64(0);
        evaluator.full_error(&mut graph, network, &settings, &objective, &dataset, &mut rng)
    };

    let with_penalty = evaluate(&regularised);
    let without_penalty = evaluate(&plain);

    let weight_square_sum: f64 = regularised.feature_groups()[0]
        .iter_neurons()
        .flat_map(|neuron| regularised.neuron(neuron).iter_weight_indices())
        .map(|weight| regularised.weight(weight).powi(2))
        .sum();
    let expected = weight_square_sum / dataset.number_of_label_samples() as f64;
    assert!(
        ((with_penalty - without_penalty) - expected).abs() < 1e-12,
        "penalty difference {} != expected {}",
        with_penalty - without_penalty,
        expected
    );
}

#[test]
fn binary_cross_entropy_reports_the_clamped_mean() {
    let objective = Objective::new(CostFunction::BinaryCrossEntropy);
    let low = 1e-16;
    let high = 1.0 - 1e-16;
    let mut state = 0x2545F4914F6CDD1Du64;
    let mut next_bit = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state & 1 == 1
    };

    let samples = 500;
    let feature_size = 20;
    let mut labels = Vec::new();
    let mut predictions = Vec::new();
    for _ in 0..samples {
        labels.push(
            (0..feature_size)
                .map(|_| if next_bit() { high } else { low })
                .collect::<Vec<f64>>(),
        );
        predictions.push(
            (0..feature_size)
                .map(|_| if next_bit() { high } else { low })
                .collect::<Vec<f64>>(),
        );
    }

    for (label, prediction) in labels.iter().zip(predictions.iter()) {
        let mut expected = 0.0;
        for (&y, &p) in label.iter().zip(prediction.iter()) {
            expected += y * p.ln() + (1.0 - y) * (1.0 - p).ln();
        }
        expected /= samples as f64;
        let reported = objective.sample_error(label, prediction, samples);
        assert!(
            (reported - expected).abs() < 1e-14 * expected.abs().max(1.0),
            "reported {} vs expected {}",
            reported,
            expected
        );
    }
}

#[test]
fn early_stopping_tracks_the_best_test_error() {
    let network = linear_single_neuron(803, 1.0);
    let settings = training_settings()
        .with_training_strategy(TrainingStrategy::EARLY_STOPPING, true);
    let mut optimizer = AutodiffOptimizer::new(
        network,
        Objective::new(CostFunction::SquaredError),
        Arc::new(constant_dataset(1.0, 3.0, 8)),
        settings,
    )
    .unwrap();
    optimizer
        .set_test_set(Arc::new(constant_dataset(1.0, 3.0, 4)))
        .unwrap();

    for _ in 0..50 {
        optimizer.iterate().unwrap();
    }
    // converging toward the target keeps improving the best test error, so
    // early stopping must not fire
    assert!(!optimizer.stop_triggered());
    assert!(optimizer.min_test_error().is_finite());
    assert!(optimizer.min_test_error_iteration() <= optimizer.current_iteration());
    assert!(optimizer.error_estimation().is_finite());
}
