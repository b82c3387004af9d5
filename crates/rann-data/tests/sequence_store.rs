//! Data store behaviour over whole sequences

use rann_data::{BackpropDataStore, DatasetImplementation, DatasetRecord, DatasetView};

fn ramp(count: usize, width: usize) -> Vec<Vec<f64>> {
    (0..count)
        .map(|i| (0..width).map(|j| (i * width + j) as f64).collect())
        .collect()
}

#[test]
fn sequence_averages_cover_every_labelled_step() {
    // memory 1, three operations (one weight relevant), sequences of four
    let mut store = BackpropDataStore::new(1, 2);
    store.build(3, 1, 4);

    for step in 0..4 {
        store.step();
        // the objective operation writes once per step and weight
        store.set_derivative(0, 0, (step + 1) as f64);
        store.set_derivative(0, 1, 10.0 * (step + 1) as f64);
    }

    // the ring holds one average per labelled step, newest at distance zero
    for past in 0..4u32 {
        let step_value = (4 - past) as f64;
        assert_eq!(store.get_average_derivative(past, 0), step_value / 2.0);
        assert_eq!(store.get_average_derivative(past, 1), 10.0 * step_value / 2.0);
    }
    assert_eq!(store.get_average_derivative(4, 0), 0.0);
}

#[test]
fn rebuilding_resizes_the_buffers() {
    let mut store = BackpropDataStore::new(0, 3);
    store.build(2, 1, 1);
    store.set_value(1, 5.0);
    assert_eq!(store.operation_count(), 2);

    store.build(6, 2, 3);
    assert_eq!(store.operation_count(), 6);
    assert_eq!(store.weight_relevant_operation_count(), 2);
    // freshly built buffers read back zero everywhere
    for op in 0..6 {
        assert_eq!(store.get_value(0, op), 0.0);
        for weight in 0..3 {
            assert_eq!(store.get_derivative(0, op, weight), 0.0);
        }
    }
}

#[test]
fn prefill_and_labels_partition_the_flat_indices() {
    // 2 sequences, 3 labels each, 2 prefill inputs each
    let dataset = DatasetImplementation::new(ramp(10, 1), ramp(6, 1), 3).unwrap();
    assert_eq!(dataset.prefill_inputs_number(), 2);
    assert_eq!(dataset.inputs_in_one_sequence(), 5);

    // the second sequence starts five inputs and three labels in
    let sequence = 1;
    let input_start = sequence * dataset.inputs_in_one_sequence();
    let label_start = sequence * dataset.sequence_size();
    assert_eq!(dataset.get_input_sample(input_start), &[5.0]);
    assert_eq!(dataset.get_label_sample(label_start), &[3.0]);
}

#[test]
fn record_roundtrip_preserves_the_sequence_shape() {
    let dataset = DatasetImplementation::new(ramp(12, 2), ramp(8, 3), 2).unwrap();
    let record = DatasetRecord::encode(&dataset);
    assert_eq!(record.sequence_size, 2);
    assert_eq!(record.possible_sequence_count, 4);
    assert_eq!(record.inputs.len(), 12 * 2);
    assert_eq!(record.labels.len(), 8 * 3);

    let decoded = record.decode().unwrap();
    assert_eq!(decoded.number_of_sequences(), 4);
    assert_eq!(decoded.prefill_inputs_number(), 1);
    assert_eq!(decoded, dataset);
}

#[test]
fn parallel_and_scalar_sweeps_store_the_same_cells() {
    let mut store = BackpropDataStore::new(1, 4);
    store.build(5, 2, 1);
    store.step();
    for op in 0..5 {
        store.set_value(op, op as f64);
    }

    store.sweep_weights(|mut column, values| {
        for op in (0..5).rev() {
            let value = values.get(0, op) + column.weight_index() as f64;
            column.set_derivative(op, value);
        }
    });

    for weight in 0..4 {
        for op in 0..5 {
            assert_eq!(
                store.get_derivative(0, op, weight),
                op as f64 + weight as f64
            );
        }
    }
}
