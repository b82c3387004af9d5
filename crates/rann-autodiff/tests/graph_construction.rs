//! Structural laws of the constructed operation graph

use rand::rngs::StdRng;
use rand::SeedableRng;
use smallvec::smallvec;

use rann_autodiff::graph::ops::OpKind;
use rann_autodiff::{CostFunction, GraphBuilder, Objective, OperationGraph};
use rann_core::{
    InputFunction, NetworkBuilder, Neuron, NeuronNetwork, NetworkRecord, SpikeFunction,
    TrainingSettings, TransferFunction, WeightSynapse,
};
use rann_data::BackpropDataStore;

fn build_graph(network: &NeuronNetwork, settings: &TrainingSettings) -> OperationGraph {
    GraphBuilder::new(network, settings, 4).build().unwrap()
}

fn store_for(network: &NeuronNetwork, graph: &OperationGraph) -> BackpropDataStore {
    let mut store = BackpropDataStore::new(network.memory_size(), network.weight_count());
    store.build(
        graph.operations().len(),
        graph.weight_relevant_operation_count(),
        1,
    );
    store
}

#[test]
fn single_neuron_graph_has_the_expected_shape() {
    let network = NetworkBuilder::new()
        .input_size(1)
        .seed(3)
        .set_neuron_transfer_function(0, 0, TransferFunction::Identity)
        .set_neuron_spike_function(0, 0, SpikeFunction::None)
        .dense_layers(&[1])
        .unwrap();
    let settings = TrainingSettings::default();
    let graph = build_graph(&network, &settings);

    let tags: Vec<_> = graph.operations().iter().map(|op| op.tag()).collect();
    use rann_autodiff::OpTag;
    assert_eq!(
        tags,
        vec![
            OpTag::Objective,
            OpTag::Spike,
            OpTag::Transfer,
            OpTag::NeuronInput,
            OpTag::NetworkInput,
            OpTag::NeuronBias,
        ]
    );
    assert_eq!(graph.weight_relevant_operation_count(), 1);
    assert_eq!(graph.output_spike_indices(), &[1]);
}

#[test]
fn every_dependency_index_exceeds_its_owner() {
    for layers in [vec![1u32], vec![3, 2], vec![4, 4, 2], vec![2, 3, 3, 1]] {
        let network = NetworkBuilder::new()
            .input_size(3)
            .seed(17)
            .dense_layers(&layers)
            .unwrap();
        let settings = TrainingSettings::default();
        let graph = build_graph(&network, &settings);
        for (index, op) in graph.operations().iter().enumerate() {
            assert!(op.operation_index_finalised());
            assert!(op.are_dependencies_registered());
            assert_eq!(op.operation_index() as usize, index);
            for dependency in op.ordering_dependencies() {
                assert!(
                    dependency as usize > index,
                    "operation {} depends on {} in layers {:?}",
                    index,
                    dependency,
                    layers
                );
            }
        }
    }
}

#[test]
fn recurrent_edges_do_not_create_ordering_dependencies() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(23)
        .add_feature_to_layer(1, rann_core::FeatureKind::BoltzmannKnot)
        .dense_layers(&[2, 2, 1])
        .unwrap();
    let settings = TrainingSettings::default();
    let graph = build_graph(&network, &settings);

    // the graph builds despite the recurrent layer, and the past-reaching
    // inputs are recorded on the operations without constraining order
    let mut past_inputs = 0;
    for op in graph.operations() {
        if let OpKind::NeuronInput(payload) = op.kind() {
            if payload.past_index > 0 {
                past_inputs += 1;
                assert!(payload.data_dep.is_some());
            }
        }
        for dependency in op.ordering_dependencies() {
            assert!(dependency > op.operation_index());
        }
    }
    // each of the two hidden neurons reaches back to the whole hidden layer
    assert_eq!(past_inputs, 4);
}

#[test]
fn spike_value_composes_input_transfer_and_past_state() {
    // single neuron, memory blend spike, identity transfer
    let network = NetworkBuilder::new()
        .input_size(1)
        .seed(5)
        .set_neuron_transfer_function(0, 0, TransferFunction::Identity)
        .set_neuron_spike_function(0, 0, SpikeFunction::Memory)
        .add_neuron_recurrence(0, 0, 1)
        .dense_layers(&[1])
        .unwrap();
    let settings = TrainingSettings::default();
    let mut graph = build_graph(&network, &settings);
    let mut store = store_for(&network, &graph);
    let mut rng = StdRng::seed_from_u64(0);

    let neuron = network.neuron(0);
    let p = network.weight(neuron.spike_weight_index().unwrap());
    let w_x = network.weight(neuron.weight_index(1).unwrap());
    let w_self = network.weight(neuron.weight_index(2).unwrap());
    let bias = network.weight(neuron.weight_index(3).unwrap());
    let spike_index = graph.output_spike_indices()[0] as usize;

    let mut expected_previous = 0.0;
    for &x in &[0.25, -1.5, 2.0] {
        store.step();
        graph.calculate_value(&network, &settings, &mut store, &[x], false, &mut rng);
        // i = w_x * x + w_self * previous + bias; spike = p*prev + (1-p)*i
        let collected = w_x * x + w_self * expected_previous + bias;
        let expected = p * expected_previous + (1.0 - p) * collected;
        let actual = store.get_value(0, spike_index);
        assert!(
            (actual - expected).abs() < 1e-12,
            "spike value {} != expected {}",
            actual,
            expected
        );
        expected_previous = expected;
    }
}

#[test]
fn derivatives_match_finite_differences() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(31)
        .allowed_transfer_functions_by_layer(vec![
            vec![TransferFunction::Sigmoid, TransferFunction::Tanh],
            vec![TransferFunction::Sigmoid],
        ])
        .dense_layers(&[2, 1])
        .unwrap();
    let settings = TrainingSettings::default();
    let objective = Objective::new(CostFunction::SquaredError);
    let input = [0.4, -0.7];
    let labels = [0.5];

    let forward = |network: &NeuronNetwork| -> f64 {
        let mut graph = build_graph(network, &settings);
        let mut store = store_for(network, &graph);
        let mut rng = StdRng::seed_from_u64(0);
        store.step();
        graph.calculate_value(network, &settings, &mut store, &input, false, &mut rng);
        store.get_value(0, graph.output_spike_indices()[0] as usize)
    };

    let mut graph = build_graph(&network, &settings);
    let mut store = store_for(&network, &graph);
    let mut rng = StdRng::seed_from_u64(0);
    store.step();
    graph.calculate_value(&network, &settings, &mut store, &input, false, &mut rng);
    graph.calculate_derivative(&network, &settings, &objective, &mut store, &input, &labels);
    let spike_index = graph.output_spike_indices()[0] as usize;

    let h = 1e-6;
    for weight_index in 0..network.weight_count() {
        let analytic = store.get_derivative(0, spike_index, weight_index);

        let mut plus = network.clone();
        plus.weight_table_mut()[weight_index] += h;
        let mut minus = network.clone();
        minus.weight_table_mut()[weight_index] -= h;
        let numeric = (forward(&plus) - forward(&minus)) / (2.0 * h);

        assert!(
            (analytic - numeric).abs() < 1e-5,
            "weight {}: analytic {} vs numeric {}",
            weight_index,
            analytic,
            numeric
        );
    }
}

#[test]
fn input_function_derivative_follows_the_product_rule() {
    // multiply-reducing neuron: i = (w1 x1) * ((w2 x2) * bias)
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(41)
        .set_neuron_input_function(0, 0, InputFunction::Multiply)
        .set_neuron_transfer_function(0, 0, TransferFunction::Identity)
        .set_neuron_spike_function(0, 0, SpikeFunction::None)
        .dense_layers(&[1])
        .unwrap();
    let settings = TrainingSettings::default();
    let objective = Objective::new(CostFunction::SquaredError);
    let mut graph = build_graph(&network, &settings);
    let mut store = store_for(&network, &graph);
    let mut rng = StdRng::seed_from_u64(0);

    let input = [1.5, -0.5];
    let neuron = network.neuron(0);
    let w1 = network.weight(neuron.weight_index(1).unwrap());
    let w2 = network.weight(neuron.weight_index(2).unwrap());
    let bias = network.weight(neuron.weight_index(3).unwrap());

    store.step();
    graph.calculate_value(&network, &settings, &mut store, &input, false, &mut rng);
    graph.calculate_derivative(&network, &settings, &objective, &mut store, &input, &[0.0]);

    let spike_index = graph.output_spike_indices()[0] as usize;
    let value = store.get_value(0, spike_index);
    assert!((value - (w1 * input[0]) * ((w2 * input[1]) * bias)).abs() < 1e-12);

    // d/dw1 = x1 * (w2 x2 * bias)
    let w1_index = neuron.weight_index(1).unwrap() as usize;
    let d_w1 = store.get_derivative(0, spike_index, w1_index);
    assert!((d_w1 - input[0] * (w2 * input[1] * bias)).abs() < 1e-12);

    // d/dbias = (w1 x1) * (w2 x2)
    let bias_index = neuron.weight_index(3).unwrap() as usize;
    let d_bias = store.get_derivative(0, spike_index, bias_index);
    assert!((d_bias - (w1 * input[0]) * (w2 * input[1])).abs() < 1e-12);
}

#[test]
fn bias_only_neuron_reduces_its_biases() {
    // hand-assembled neuron with no inputs and two bias weights
    let neuron = Neuron {
        input_function: InputFunction::Add,
        transfer_function: TransferFunction::Identity,
        spike_function: SpikeFunction::None,
        input_synapses: smallvec![],
        weight_synapses: smallvec![WeightSynapse { start: 0, size: 3 }],
    };
    let network =
        NeuronNetwork::new(1, 0, 1, vec![0.5, 0.75, 1.25], vec![neuron], Vec::new()).unwrap();
    let settings = TrainingSettings::default();
    let mut graph = build_graph(&network, &settings);
    let mut store = store_for(&network, &graph);
    let mut rng = StdRng::seed_from_u64(0);

    store.step();
    graph.calculate_value(&network, &settings, &mut store, &[9.0], false, &mut rng);
    let output = store.get_value(0, graph.output_spike_indices()[0] as usize);
    assert!((output - (0.75 + 1.25)).abs() < 1e-12);
}

#[test]
fn memory_size_zero_degenerates_past_reads() {
    let network = NetworkBuilder::new()
        .input_size(1)
        .seed(9)
        .allowed_spike_functions(vec![SpikeFunction::Memory])
        .dense_layers(&[1])
        .unwrap();
    assert_eq!(network.memory_size(), 0);
    let settings = TrainingSettings::default();
    let mut graph = build_graph(&network, &settings);
    let mut store = store_for(&network, &graph);
    let mut rng = StdRng::seed_from_u64(0);

    // with no remembered past, repeated identical steps cannot differ
    let mut outputs = Vec::new();
    for _ in 0..3 {
        store.step();
        graph.calculate_value(&network, &settings, &mut store, &[1.0], false, &mut rng);
        outputs.push(store.get_value(0, graph.output_spike_indices()[0] as usize));
    }
    assert_eq!(outputs[0].to_bits(), outputs[1].to_bits());
    assert_eq!(outputs[1].to_bits(), outputs[2].to_bits());
}

#[test]
fn rebuilt_network_yields_an_identical_graph_and_output() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(77)
        .add_feature_to_layer(0, rann_core::FeatureKind::L2Regularization)
        .dense_layers(&[3, 2])
        .unwrap();
    let settings = TrainingSettings::default();

    let record = NetworkRecord::encode(&network);
    let rebuilt = record.decode().unwrap();

    let graph_a = build_graph(&network, &settings);
    let graph_b = build_graph(&rebuilt, &settings);
    assert_eq!(graph_a.operations().len(), graph_b.operations().len());
    for (a, b) in graph_a.operations().iter().zip(graph_b.operations()) {
        assert_eq!(a.tag(), b.tag());
        assert_eq!(a.operation_index(), b.operation_index());
        assert_eq!(a.ordering_dependencies(), b.ordering_dependencies());
    }

    let run = |network: &NeuronNetwork| -> Vec<f64> {
        let mut graph = build_graph(network, &settings);
        let mut store = store_for(network, &graph);
        let mut rng = StdRng::seed_from_u64(0);
        store.step();
        graph.calculate_value(network, &settings, &mut store, &[0.3, 0.6], false, &mut rng);
        graph
            .output_spike_indices()
            .iter()
            .map(|&spike| store.get_value(0, spike as usize))
            .collect()
    };
    assert_eq!(run(&network), run(&rebuilt));
}
