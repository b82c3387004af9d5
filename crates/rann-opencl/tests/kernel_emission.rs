//! Emission coverage over richer network shapes

use rann_autodiff::{CostFunction, GraphBuilder, Objective, WavePlan};
use rann_core::{FeatureKind, NetworkBuilder, TrainingSettings};
use rann_data::{DatasetImplementation, DatasetView};
use rann_opencl::GpuTrainingStrategy;

fn sequence_dataset() -> DatasetImplementation {
    // 3 sequences of 2 labelled steps with 1 prefill input each
    DatasetImplementation::new(
        vec![vec![0.1, 0.2]; 9],
        vec![vec![0.5]; 6],
        2,
    )
    .unwrap()
}

#[test]
fn recurrent_regularised_network_emits_a_complete_kernel() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(70)
        .add_feature_to_layer(0, FeatureKind::BoltzmannKnot)
        .add_feature_to_layer(0, FeatureKind::L2Regularization)
        .dense_layers(&[2, 1])
        .unwrap();
    assert_eq!(network.memory_size(), 1);
    let settings = TrainingSettings::default();
    let dataset = sequence_dataset();
    let graph = GraphBuilder::new(&network, &settings, dataset.number_of_label_samples())
        .build()
        .unwrap();
    let objective = Objective::new(CostFunction::MeanSquaredError);

    let strategy =
        GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset).unwrap();
    let source = strategy.source();

    // past-reaching inputs guard on the remembered window
    assert!(source.contains("available_memory_slots"));
    // the regularisation group answers with the L2 slope for its weights
    assert!(source.contains("2.0 * network_weights[d_w_index]"));
    // the recurrent reads index one whole step block backwards
    assert!(source.contains("operation_count * 1"));
    assert!(!source.contains("===="));
}

#[test]
fn softmax_feature_is_emitted_outside_the_worker_switch() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(71)
        .add_feature_to_layer(1, FeatureKind::Softmax)
        .dense_layers(&[2, 3])
        .unwrap();
    let settings = TrainingSettings::default();
    let dataset = DatasetImplementation::new(
        vec![vec![0.3, 0.4]; 4],
        vec![vec![1.0, 0.0, 0.0]; 4],
        1,
    )
    .unwrap();
    let graph = GraphBuilder::new(&network, &settings, dataset.number_of_label_samples())
        .build()
        .unwrap();
    let objective = Objective::new(CostFunction::CrossEntropy);

    let strategy =
        GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset).unwrap();
    let source = strategy.source();
    assert!(source.contains("feature_max"));
    assert!(source.contains("feature_sum"));
    // the bulk feature runs on worker zero ahead of the switch
    assert!(source.contains("if(0 == get_local_id(0)){"));
}

#[test]
fn worker_slots_cover_the_widest_wave_in_packs() {
    let network = NetworkBuilder::new()
        .input_size(4)
        .seed(72)
        .dense_layers(&[6, 4, 2])
        .unwrap();
    let settings = TrainingSettings::default();
    let dataset = DatasetImplementation::new(
        vec![vec![0.0; 4]; 4],
        vec![vec![0.0; 2]; 4],
        1,
    )
    .unwrap();
    let graph = GraphBuilder::new(&network, &settings, dataset.number_of_label_samples())
        .build()
        .unwrap();
    let plan = WavePlan::new(&graph);
    let widest = plan.waves().iter().map(Vec::len).max().unwrap();
    assert!(widest > plan.worker_count());

    let objective = Objective::new(CostFunction::SquaredError);
    let strategy =
        GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset).unwrap();
    // the case labels never exceed the advertised local worker count
    for worker in 0..strategy.maximum_local_workers() {
        let label = format!("case {}:", worker);
        assert!(strategy.source().contains(&label));
    }
    let over_label = format!("case {}:", strategy.maximum_local_workers());
    assert!(!strategy.source().contains(&over_label));
}
