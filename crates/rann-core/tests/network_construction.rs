//! Cross-module behaviour of the builder, the router and the records

use rann_core::{
    FeatureKind, InputFunction, InputRef, NetworkBuilder, NetworkRecord, NeuronRouter,
    SpikeFunction, TransferFunction,
};

#[test]
fn built_networks_always_validate() {
    for (layers, seed) in [
        (vec![1u32], 1u64),
        (vec![4, 4], 2),
        (vec![3, 5, 2], 3),
        (vec![2, 2, 2, 2], 4),
    ] {
        let network = NetworkBuilder::new()
            .input_size(3)
            .seed(seed)
            .dense_layers(&layers)
            .unwrap();
        network.validate().unwrap();
        assert_eq!(network.output_count(), *layers.last().unwrap());
        assert_eq!(
            network.neuron_count(),
            layers.iter().sum::<u32>() as usize
        );
    }
}

#[test]
fn weight_ownership_is_exclusive_and_exhaustive() {
    let network = NetworkBuilder::new()
        .input_size(4)
        .seed(12)
        .add_neuron_recurrence(1, 1, 2)
        .dense_layers(&[4, 3, 2])
        .unwrap();

    let mut owner_count = vec![0u32; network.weight_count()];
    for neuron in network.neurons() {
        for weight_index in neuron.iter_weight_indices() {
            owner_count[weight_index as usize] += 1;
        }
    }
    assert!(owner_count.iter().all(|&count| count == 1));
}

#[test]
fn router_visits_every_neuron_exactly_once() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(8)
        .add_feature_to_layer(1, FeatureKind::BoltzmannKnot)
        .dense_layers(&[3, 3, 2])
        .unwrap();
    let mut router = NeuronRouter::new(&network);

    let mut visited = Vec::new();
    while !router.finished() {
        router.collect_subset(4, 2048.0, true);
        let subset: Vec<u32> = router.subset().iter().copied().collect();
        assert!(!subset.is_empty());
        for neuron_index in subset {
            // every same-step input must already be processed or sit in
            // front of the neuron inside this subset
            assert!(router.is_neuron_without_dependency(neuron_index));
            router
                .confirm_first_subset_element_processed(neuron_index)
                .unwrap();
            visited.push(neuron_index);
        }
    }

    let mut sorted = visited.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), network.neuron_count());
    // outputs occupy the tail of the neuron array and are visited last
    assert_eq!(
        visited.last().copied(),
        Some(network.neuron_count() as u32 - 1)
    );
}

#[test]
fn function_overrides_survive_the_record_roundtrip() {
    let network = NetworkBuilder::new()
        .input_size(2)
        .seed(99)
        .set_neuron_input_function(0, 1, InputFunction::Multiply)
        .set_neuron_transfer_function(1, 0, TransferFunction::Swish)
        .set_neuron_spike_function(1, 0, SpikeFunction::Amplify)
        .dense_layers(&[2, 1])
        .unwrap();

    assert_eq!(network.neuron(1).input_function, InputFunction::Multiply);
    assert_eq!(network.neuron(2).transfer_function, TransferFunction::Swish);
    assert_eq!(network.neuron(2).spike_function, SpikeFunction::Amplify);

    let rebuilt = NetworkRecord::encode(&network).decode().unwrap();
    assert_eq!(rebuilt.neuron(1).input_function, InputFunction::Multiply);
    assert_eq!(rebuilt.neuron(2).transfer_function, TransferFunction::Swish);
    assert_eq!(rebuilt.neuron(2).spike_function, SpikeFunction::Amplify);
}

#[test]
fn first_layer_reads_the_whole_input_array() {
    let network = NetworkBuilder::new()
        .input_size(5)
        .seed(31)
        .dense_layers(&[2, 1])
        .unwrap();
    for neuron_index in 0..2 {
        let neuron = network.neuron(neuron_index);
        assert_eq!(neuron.input_count(), 5);
        for slot in 0..5 {
            let (input, reach_past) = neuron.input_ref(slot).unwrap();
            assert_eq!(input, InputRef::Network(slot));
            assert_eq!(reach_past, 0);
        }
    }
}

#[test]
fn byte_budget_limits_one_collection() {
    let network = NetworkBuilder::new()
        .input_size(8)
        .seed(13)
        .dense_layers(&[16, 16, 4])
        .unwrap();
    let mut router = NeuronRouter::new(&network);
    // a budget of nearly nothing still reserves at least one neuron per pass
    router.collect_subset(4, 0.0001, true);
    assert!(router.subset().len() < network.neuron_count());
    assert!(router.subset_bytes() > 0);
}
