//! Single-kernel training strategy
//!
//! Materialises the operation graph into one OpenCL kernel implementing the
//! forward+backward sweep over a whole minibatch. Per workgroup the kernel
//! processes one sequence; per time step it runs the forward worker switch
//! wave by wave, then the derivative worker switch for the weight index
//! passed as a kernel argument, reducing the weight-relevant derivative
//! cells into the weight derivative output through an atomic add.

use rann_autodiff::graph::OperationGraph;
use rann_autodiff::{Objective, WavePlan};
use rann_core::{NeuronNetwork, TrainingSettings};
use rann_data::DatasetView;

use crate::error::{EmitterError, Result};
use crate::library::{ATOMIC_DOUBLE_ADD, ATOMIC_DOUBLE_AVERAGE, XORSHIFT_RANDOM};
use crate::operations::{
    derivative_kernel_source, local_declarations, replace_token, value_kernel_source,
    EmitContext, KernelArrays,
};

/// Sizes of the kernel input and output buffers, in doubles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelBufferShapes {
    /// Input buffer partition sizes:
    /// `[weights, inputs, labels, sequence_start_index, sequence_truncation, d_w_index]`
    pub inputs: Vec<usize>,
    /// Output buffer partition sizes:
    /// `[op_values, op_derivatives, weight_derivatives]`
    pub outputs: Vec<usize>,
}

/// The emitted training kernel and its launch geometry
#[derive(Debug, Clone)]
pub struct GpuTrainingStrategy {
    source: String,
    number_of_operations: usize,
    maximum_local_workers: usize,
    shapes: KernelBufferShapes,
}

impl GpuTrainingStrategy {
    /// Emit the kernel for a finalised graph over the given dataset shape
    pub fn build(
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        objective: &Objective,
        graph: &OperationGraph,
        dataset: &dyn DatasetView,
    ) -> Result<Self> {
        if graph.operations().is_empty() {
            return Err(EmitterError::GraphNotEmittable {
                reason: "the operation graph is empty".into(),
            });
        }
        let plan = WavePlan::new(graph);
        let arrays = KernelArrays::default();
        let context = EmitContext {
            network,
            settings,
            objective,
            sample_count: graph.sample_count().to_string(),
            arrays: &arrays,
        };

        let operation_locals = collect_locals(graph);
        let value_switches = generate_switch_cases(graph, &plan, |op| {
            value_kernel_source(op, &context)
        });
        let derivative_switches = generate_switch_cases(graph, &plan, |op| {
            derivative_kernel_source(op, &context)
        });

        let mut source = String::new();
        source.push_str(ATOMIC_DOUBLE_ADD);
        source.push_str(ATOMIC_DOUBLE_AVERAGE);
        source.push_str(XORSHIFT_RANDOM);
        source.push_str(KERNEL_SKELETON);

        let minibatch_size = (settings.minibatch_size as usize)
            .min(dataset.number_of_sequences())
            .max(1);
        source = replace_token(source, "==operation_locals==", &operation_locals);
        source = replace_token(source, "==operation_switches==", &value_switches);
        source = replace_token(source, "==derivative_operations==", &derivative_switches);
        source = replace_token(
            source,
            "==network_memory_size==",
            &network.memory_size().to_string(),
        );
        source = replace_token(
            source,
            "==operation_count==",
            &graph.operations().len().to_string(),
        );
        source = replace_token(
            source,
            "==neuron_count==",
            &network.neuron_count().to_string(),
        );
        source = replace_token(
            source,
            "==sequence_size==",
            &dataset.sequence_size().to_string(),
        );
        source = replace_token(
            source,
            "==prefill_num==",
            &dataset.prefill_inputs_number().to_string(),
        );
        source = replace_token(
            source,
            "==number_of_sequences==",
            &dataset.number_of_sequences().to_string(),
        );
        source = replace_token(source, "==minibatch_size==", &minibatch_size.to_string());
        source = replace_token(
            source,
            "==weight_relevant_operation_count==",
            &graph.weight_relevant_operation_count().to_string(),
        );
        source = replace_token(
            source,
            "==one_input_size==",
            &dataset.input_size().to_string(),
        );
        source = replace_token(
            source,
            "==one_label_size==",
            &dataset.feature_size().to_string(),
        );

        validate_substitution_coverage(&source)?;

        let shapes = KernelBufferShapes {
            inputs: vec![
                network.weight_count(),
                dataset.number_of_sequences()
                    * dataset.inputs_in_one_sequence()
                    * dataset.input_size(),
                dataset.number_of_sequences() * dataset.sequence_size() * dataset.feature_size(),
                1,
                1,
                1,
            ],
            outputs: vec![
                dataset.number_of_sequences()
                    * dataset.inputs_in_one_sequence()
                    * graph.operations().len(),
                dataset.number_of_sequences()
                    * dataset.sequence_size()
                    * graph.operations().len(),
                network.weight_count(),
            ],
        };

        log::info!(
            "built autodiff training kernel: {} operations over {} waves, {} worker slots, {} chars",
            graph.operations().len(),
            plan.waves().len(),
            plan.worker_count(),
            source.len()
        );

        Ok(Self {
            source,
            number_of_operations: graph.operations().len(),
            maximum_local_workers: plan.worker_count(),
            shapes,
        })
    }

    /// The kernel source string
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of operations the kernel computes per step
    pub fn number_of_operations(&self) -> usize {
        self.number_of_operations
    }

    /// Worker slots per wave; the local work size of the enqueue
    pub fn maximum_local_workers(&self) -> usize {
        self.maximum_local_workers
    }

    /// Input and output buffer partition sizes
    pub fn buffer_shapes(&self) -> &KernelBufferShapes {
        &self.shapes
    }
}

/// Gather the local declarations of every operation kind used by the graph,
/// each exactly once
fn collect_locals(graph: &OperationGraph) -> String {
    let mut declared = Vec::new();
    let mut locals = String::new();
    for op in graph.operations() {
        let tag = op.tag();
        if !declared.contains(&tag) {
            locals.push_str(local_declarations(tag));
            declared.push(tag);
        }
    }
    locals
}

/// Render the wave matrix into per-wave worker switches
///
/// Within a wave, single-cell operations are dealt to the worker slots in
/// turn; a wave wider than the worker count keeps dealing, so a slot runs
/// its share back to back. Multi-worker operations (bulk features) are
/// emitted in front of the switch where every worker passes through them.
fn generate_switch_cases<F>(
    graph: &OperationGraph,
    plan: &WavePlan,
    mut operation_generator: F,
) -> String
where
    F: FnMut(&rann_autodiff::Operation) -> String,
{
    let worker_count = plan.worker_count();
    let mut result = String::new();
    for wave in plan.waves() {
        let mut worker_slots: Vec<String> = vec![String::new(); worker_count];
        let mut multi_worker = String::new();
        for (position, &operation_index) in wave.iter().enumerate() {
            let op = &graph.operations()[operation_index as usize];
            let code = operation_generator(op);
            if code.is_empty() {
                continue;
            }
            if WavePlan::is_multi_worker(graph, operation_index) {
                multi_worker.push_str(&code);
            } else {
                worker_slots[position % worker_count].push_str(&code);
            }
        }

        let mut all_worker_cases = String::new();
        for (worker_index, contents) in worker_slots.iter().enumerate() {
            if contents.is_empty() {
                continue;
            }
            all_worker_cases.push_str(&format!(
                "      case {}:{{\n{}      }}break;\n",
                worker_index, contents
            ));
        }
        if multi_worker.is_empty() && all_worker_cases.is_empty() {
            continue;
        }
        if !multi_worker.is_empty() {
            // bulk features run on one worker while the rest wait
            result.push_str(&format!(
                "    if(0 == get_local_id(0)){{\n{}    }}\n",
                multi_worker
            ));
        }
        result.push_str(&format!(
            "    switch(get_local_id(0)){{\n{}      default:break;\n    }}\n    barrier(CLK_GLOBAL_MEM_FENCE);\n",
            all_worker_cases
        ));
    }
    result
}

/// Fail when a `==token==` hole survived substitution
fn validate_substitution_coverage(source: &str) -> Result<()> {
    let bytes = source.as_bytes();
    let mut cursor = 0;
    while let Some(start) = source[cursor..].find("==").map(|at| cursor + at) {
        let mut end = start + 2;
        while end < bytes.len()
            && (bytes[end].is_ascii_lowercase() || bytes[end] == b'_')
        {
            end += 1;
        }
        if end > start + 2 && source[end..].starts_with("==") {
            return Err(EmitterError::UnresolvedToken {
                token: source[start..end + 2].to_string(),
            });
        }
        cursor = start + 2;
    }
    Ok(())
}

/// Kernel skeleton the per-graph pieces are substituted into
const KERNEL_SKELETON: &str = r#"
  __constant bool evaluate_network = true;

  void execute_derivative_workers(
    int d_w_index, int available_memory_slots, int weight_table_size, int operation_count, bool save_to_output,
    __constant double* network_inputs, __constant double* labels, __constant double* network_weights,
    __global double* operations_value_array, __global double* operations_d_array, __global double* d_w_array
  ){
    ==operation_locals==
    ==derivative_operations==
    barrier(CLK_GLOBAL_MEM_FENCE);

    if(save_to_output && (0 == get_local_id(0))){
      for(int operation_index = 0; operation_index < ==weight_relevant_operation_count==; ++operation_index){
        AtomicAdd(&d_w_array[d_w_index], operations_d_array[operation_index]);
      }
    }
    barrier(CLK_GLOBAL_MEM_FENCE);
  }/*execute_derivative_workers()*/

  void execute_value_workers(
    int available_memory_slots, int weight_table_size, int operation_count,
    __constant double* network_inputs, __constant double* network_weights,
    __global double* operations_value_array
  ){
    ==operation_locals==
    ==operation_switches==
  }/*execute_value_workers()*/

  void __kernel autodiff_iterate(
    __constant double* inputs, __constant int* input_sizes, int input_sizes_size,
    __global double* outputs, __constant int* output_sizes, int output_sizes_size
  ){
    const int number_of_sequences = ==number_of_sequences==;
    const int minibatch_size = ==minibatch_size==;
    const int network_memory_size = ==network_memory_size==;
    const int sequence_inputs_count = ==prefill_num== + ==sequence_size==;
    const int sequence_labels_count = ==sequence_size==;
    const int neuron_count = ==neuron_count==;
    const int operation_count = ==operation_count==;
    const int sequences_in_work_groups = (minibatch_size / get_num_groups(0)) + 1;
    const int d_w_index = inputs[input_sizes[0] + input_sizes[1] + input_sizes[2] + input_sizes[3] + input_sizes[4]];
    const int weight_table_size = input_sizes[0];
    uint local_seed = (uint)(inputs[min(get_global_id(0), (size_t)(input_sizes[0]))] * 100000.0);
    __local int sequence_start;
    __local int sequence_truncation;
    __local int sequences_in_this_group;
    if(0 == get_local_id(0)){
      sequence_start = (int)(inputs[input_sizes[0] + input_sizes[1] + input_sizes[2]]);
      sequence_start = max( 0, min(sequence_start, (number_of_sequences - minibatch_size)) );
      sequence_start = sequence_start + (get_group_id(0) * sequences_in_work_groups);
      sequences_in_this_group = min( sequences_in_work_groups, (number_of_sequences - sequence_start) );

      sequence_truncation = inputs[input_sizes[0] + input_sizes[1] + input_sizes[2] + input_sizes[3]];
      sequence_truncation = (sequence_truncation == 0)?(sequence_labels_count):(max(1, sequence_truncation));
    }
    barrier(CLK_LOCAL_MEM_FENCE);

    int network_inputs_start_index = weight_table_size + sequence_start * sequence_inputs_count * ==one_input_size==;
    int network_labels_start_index = weight_table_size + input_sizes[1] + sequence_start * sequence_labels_count * ==one_label_size==;
    int network_values_start_index = sequence_start * sequence_inputs_count * operation_count;
    int network_derivatives_start_index = output_sizes[0] + sequence_start * sequence_labels_count * operation_count;

    for(int sequence_index = sequence_start; sequence_index < (sequence_start + sequences_in_this_group); ++sequence_index){
      int network_ran_count = 0;
      int available_memory_slots = 0;
      for(int prefill_index = 0; prefill_index < ==prefill_num==; ++prefill_index){
        execute_value_workers(
          available_memory_slots, weight_table_size, operation_count,
          &inputs[network_inputs_start_index], &inputs[0],
          &outputs[network_values_start_index]
        );
        ++network_ran_count;
        available_memory_slots = min(network_ran_count, network_memory_size);
        network_inputs_start_index += ==one_input_size==;
        network_values_start_index += operation_count;
      }/*for(prefill of the sequence)*/
      uint sequence_truncation_start = get_random_number(
        max(1, (sequence_labels_count - sequence_truncation)), &local_seed
      );
      for(int label_index = 0; label_index < sequence_labels_count; ++label_index){
        execute_value_workers(
          available_memory_slots, weight_table_size, operation_count,
          &inputs[network_inputs_start_index], &inputs[0],
          &outputs[network_values_start_index]
        );
        execute_derivative_workers(
          d_w_index, min(available_memory_slots, label_index), weight_table_size,
          operation_count, (
            ( label_index >= sequence_truncation_start )
            &&( label_index < (sequence_truncation_start + sequence_truncation) )
          ),
          &inputs[network_inputs_start_index],
          &inputs[network_labels_start_index],
          &inputs[0],
          &outputs[network_values_start_index],
          &outputs[network_derivatives_start_index],
          &outputs[output_sizes[0] + output_sizes[1]]
        );
        ++network_ran_count;
        if(label_index < sequence_labels_count - 1){
          available_memory_slots = min(network_ran_count, network_memory_size);
          network_inputs_start_index += ==one_input_size==;
          network_labels_start_index += ==one_label_size==;
          network_values_start_index += operation_count;
          network_derivatives_start_index += operation_count;
        }
      }/*for(every label inside the sequence)*/
    }/*for(every relevant sequence index)*/
  }/*kernel*/
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rann_autodiff::{CostFunction, GraphBuilder};
    use rann_core::NetworkBuilder;
    use rann_data::DatasetImplementation;

    fn fixture() -> (
        NeuronNetwork,
        TrainingSettings,
        Objective,
        OperationGraph,
        DatasetImplementation,
    ) {
        let network = NetworkBuilder::new()
            .input_size(2)
            .seed(21)
            .dense_layers(&[2, 1])
            .unwrap();
        let settings = TrainingSettings::default();
        let dataset = DatasetImplementation::new(
            vec![vec![0.5, 0.25]; 4],
            vec![vec![1.0]; 4],
            1,
        )
        .unwrap();
        let graph = GraphBuilder::new(&network, &settings, 4).build().unwrap();
        let objective = Objective::new(CostFunction::SquaredError);
        (network, settings, objective, graph, dataset)
    }

    #[test]
    fn test_emitted_kernel_contains_the_entry_point() {
        let (network, settings, objective, graph, dataset) = fixture();
        let strategy =
            GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset)
                .unwrap();
        let source = strategy.source();
        assert!(source.contains("__kernel autodiff_iterate"));
        assert!(source.contains("execute_value_workers"));
        assert!(source.contains("execute_derivative_workers"));
        assert!(source.contains("AtomicAdd"));
        assert!(source.contains("get_random_number"));
    }

    #[test]
    fn test_every_token_is_substituted() {
        let (network, settings, objective, graph, dataset) = fixture();
        let strategy =
            GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset)
                .unwrap();
        assert!(validate_substitution_coverage(strategy.source()).is_ok());
    }

    #[test]
    fn test_coverage_validation_catches_leftovers() {
        let result = validate_substitution_coverage("a = ==op_index==;");
        assert!(matches!(
            result,
            Err(EmitterError::UnresolvedToken { token }) if token == "==op_index=="
        ));
        // comparison operators are not tokens
        assert!(validate_substitution_coverage("if(a == b){}").is_ok());
    }

    #[test]
    fn test_buffer_shapes_follow_the_dataset() {
        let (network, settings, objective, graph, dataset) = fixture();
        let strategy =
            GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset)
                .unwrap();
        let shapes = strategy.buffer_shapes();
        assert_eq!(shapes.inputs[0], network.weight_count());
        assert_eq!(shapes.inputs[1], 4 * 1 * 2);
        assert_eq!(shapes.inputs[2], 4 * 1 * 1);
        assert_eq!(&shapes.inputs[3..], &[1, 1, 1]);
        assert_eq!(
            shapes.outputs[0],
            4 * 1 * graph.operations().len()
        );
        assert_eq!(shapes.outputs[2], network.weight_count());
    }

    #[test]
    fn test_locals_are_declared_once_per_used_kind() {
        let (network, settings, objective, graph, dataset) = fixture();
        let strategy =
            GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset)
                .unwrap();
        // two sweeps declare the locals once each
        assert_eq!(strategy.source().matches("double f_x_value;").count(), 2);
        assert_eq!(strategy.source().matches("double past_value;").count(), 2);
    }

    #[test]
    fn test_worker_count_matches_wave_average() {
        let (network, settings, objective, graph, dataset) = fixture();
        let plan = WavePlan::new(&graph);
        let strategy =
            GpuTrainingStrategy::build(&network, &settings, &objective, &graph, &dataset)
                .unwrap();
        assert_eq!(strategy.maximum_local_workers(), plan.worker_count());
    }
}
