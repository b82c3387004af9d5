//! Per-operation kernel source emission
//!
//! Every operation kind renders a template carrying `==token==` holes,
//! then fills the holes with its own indices. The strategy validates that
//! no hole survives into the final kernel, so a template/substitution
//! mismatch fails the build instead of compiling a broken kernel.

use rann_autodiff::graph::ops::{OpKind, SolutionFeatureOp, WeightRegOp};
use rann_autodiff::graph::{OpTag, Operation};
use rann_autodiff::Objective;
use rann_core::{FeatureKind, InputRef, NeuronNetwork, TrainingSettings};

/// Names of the buffers and size expressions visible to the generated code
#[derive(Debug, Clone)]
pub struct KernelArrays {
    /// Network input array name
    pub network_inputs: String,
    /// Label array name
    pub labels: String,
    /// Weight table array name
    pub weights: String,
    /// Operation value array name
    pub values: String,
    /// Operation derivative array name
    pub derivatives: String,
    /// Expression for the operation value array size of one step
    pub value_array_size: String,
    /// Expression for the operation derivative array size of one step
    pub derivative_array_size: String,
}

impl Default for KernelArrays {
    fn default() -> Self {
        Self {
            network_inputs: "network_inputs".into(),
            labels: "labels".into(),
            weights: "network_weights".into(),
            values: "operations_value_array".into(),
            derivatives: "operations_d_array".into(),
            value_array_size: "operation_count".into(),
            derivative_array_size: "operation_count".into(),
        }
    }
}

/// Everything the per-operation emitters need to render themselves
#[derive(Debug)]
pub(crate) struct EmitContext<'a> {
    pub network: &'a NeuronNetwork,
    pub settings: &'a TrainingSettings,
    pub objective: &'a Objective,
    pub sample_count: String,
    pub arrays: &'a KernelArrays,
}

/// Replace every occurrence of a substitution token
pub(crate) fn replace_token(source: String, token: &str, value: &str) -> String {
    source.replace(token, value)
}

/// Local variable declarations required by an operation kind, emitted once
/// per used kind
pub(crate) fn local_declarations(tag: OpTag) -> &'static str {
    match tag {
        OpTag::NeuronInput => {
            "double f_x_value;\n    double u_x_value;\n    double f_x_derivative;\n    double u_x_derivative;\n"
        }
        OpTag::Spike => "double past_value;\n    double past_derivative_value;\n",
        OpTag::SolutionFeature => {
            "double feature_max;\n    double feature_sum;\n    uint feature_seed = (uint)(get_global_id(0)) + 1u;\n"
        }
        _ => "",
    }
}

/// Fill the array-name and array-size holes shared by every template
fn substitute_arrays(mut source: String, arrays: &KernelArrays) -> String {
    source = replace_token(source, "==network_input_array==", &arrays.network_inputs);
    source = replace_token(source, "==label_array==", &arrays.labels);
    source = replace_token(source, "==weight_array==", &arrays.weights);
    source = replace_token(source, "==op_value_array==", &arrays.values);
    source = replace_token(source, "==op_derivative_array==", &arrays.derivatives);
    source = replace_token(source, "==op_array_size==", &arrays.value_array_size);
    source = replace_token(source, "==op_d_array_size==", &arrays.derivative_array_size);
    source
}

/// Forward-value kernel code of one operation
pub(crate) fn value_kernel_source(op: &Operation, ctx: &EmitContext<'_>) -> String {
    let index = op.operation_index().to_string();
    let source = match op.kind() {
        OpKind::NetworkInput(payload) => {
            let template = "==op_value_array==[==op_index==] = ==network_input_array==[==network_input_index==] * ==weight_array==[==this_op_weight_index==];\n";
            let mut code = template.to_string();
            code = replace_token(code, "==network_input_index==", &payload.input_index.to_string());
            code = replace_token(code, "==this_op_weight_index==", &payload.weight_index.to_string());
            code
        }
        OpKind::NeuronBias(payload) => {
            let mut code = match payload.next_dep {
                Some(next) => {
                    let collected = ctx
                        .network
                        .neuron(payload.neuron_index)
                        .input_function
                        .kernel_expression(
                            "==weight_array==[==this_op_weight_index==]",
                            "==op_value_array==[==value_dep_op_index==]",
                        );
                    let code = format!(
                        "==op_value_array==[==op_index==] = {};\n",
                        collected
                    );
                    replace_token(code, "==value_dep_op_index==", &next.to_string())
                }
                None => "==op_value_array==[==op_index==] = ==weight_array==[==this_op_weight_index==];\n".to_string(),
            };
            code = replace_token(code, "==this_op_weight_index==", &payload.weight_index.to_string());
            code
        }
        OpKind::NeuronInput(payload) => {
            let data_dep = payload.data_dep.expect("finalised graph");
            let next_dep = payload.next_dep.expect("finalised graph");
            let f_x_template = match payload.source {
                InputRef::Network(_) => {
                    "f_x_value = ==op_value_array==[==value_dep_op_index==];\n"
                }
                InputRef::Neuron(_) => {
                    "if(==past_index== <= available_memory_slots){\n  f_x_value = ==op_value_array==[==value_dep_op_index== - (==op_array_size== * ==past_index==)] * ==weight_array==[==this_op_weight_index==];\n}else{\n  f_x_value = 0.0;\n}\n"
                }
            };
            let collected = ctx
                .network
                .neuron(payload.neuron_index)
                .input_function
                .kernel_expression("f_x_value", "u_x_value");
            let mut code = format!(
                "u_x_value = ==op_value_array==[==next_dep_op_index==];\n{}==op_value_array==[==op_index==] = {};\n",
                f_x_template, collected
            );
            code = replace_token(code, "==next_dep_op_index==", &next_dep.to_string());
            code = replace_token(code, "==value_dep_op_index==", &data_dep.to_string());
            code = replace_token(code, "==past_index==", &payload.past_index.to_string());
            code = replace_token(code, "==this_op_weight_index==", &payload.weight_index.to_string());
            code
        }
        OpKind::Transfer(payload) => {
            let dep = payload.input_dep.expect("finalised graph");
            let transferred = ctx
                .network
                .neuron(payload.neuron_index)
                .transfer_function
                .kernel_expression(ctx.settings, "==op_value_array==[==value_dep_op_index==]");
            let code = format!("==op_value_array==[==op_index==] = {};\n", transferred);
            replace_token(code, "==value_dep_op_index==", &dep.to_string())
        }
        OpKind::Spike(payload) => {
            let neuron = ctx.network.neuron(payload.neuron_index);
            let dep = payload.transfer_dep.expect("finalised graph");
            let spiked = neuron.spike_function.kernel_expression(
                "==weight_array==[==this_op_weight_index==]",
                "past_value",
                "==op_value_array==[==value_dep_op_index==]",
            );
            let mut code = format!(
                "if(0 < available_memory_slots){{\n  past_value = ==op_value_array==[==op_index== - ==op_array_size==];\n}}else{{\n  past_value = 0.0;\n}}\n==op_value_array==[==op_index==] = {};\n",
                spiked
            );
            code = replace_token(code, "==value_dep_op_index==", &dep.to_string());
            code = replace_token(
                code,
                "==this_op_weight_index==",
                &neuron
                    .spike_weight_index()
                    .expect("validated neuron")
                    .to_string(),
            );
            code
        }
        OpKind::SolutionFeature(payload) => solution_feature_value_source(payload, ctx),
        // objective values are never consumed, penalties have no forward value
        OpKind::Objective(_) | OpKind::WeightRegularization(_) => String::new(),
    };
    let source = replace_token(source, "==op_index==", &index);
    substitute_arrays(source, ctx.arrays)
}

/// Derivative kernel code of one operation, for the weight index held in
/// the kernel argument `d_w_index`
pub(crate) fn derivative_kernel_source(op: &Operation, ctx: &EmitContext<'_>) -> String {
    let index = op.operation_index().to_string();
    let source = match op.kind() {
        OpKind::NetworkInput(payload) => {
            let template = "if(d_w_index == ==this_op_weight_index==){\n  ==op_derivative_array==[==op_index==] = ==network_input_array==[==network_input_index==];\n}else{\n  ==op_derivative_array==[==op_index==] = 0.0;\n}\n";
            let mut code = template.to_string();
            code = replace_token(code, "==network_input_index==", &payload.input_index.to_string());
            code = replace_token(code, "==this_op_weight_index==", &payload.weight_index.to_string());
            code
        }
        OpKind::NeuronBias(payload) => {
            let mut code = match payload.next_dep {
                Some(next) => {
                    let derived = ctx
                        .network
                        .neuron(payload.neuron_index)
                        .input_function
                        .kernel_derivative_expression(
                            "==weight_array==[==this_op_weight_index==]",
                            "((d_w_index == ==this_op_weight_index==) ? 1.0 : 0.0)",
                            "==op_value_array==[==value_dep_op_index==]",
                            "==op_derivative_array==[==value_dep_op_index==]",
                        );
                    let code = format!(
                        "==op_derivative_array==[==op_index==] = {};\n",
                        derived
                    );
                    replace_token(code, "==value_dep_op_index==", &next.to_string())
                }
                None => "==op_derivative_array==[==op_index==] = (d_w_index == ==this_op_weight_index==) ? 1.0 : 0.0;\n".to_string(),
            };
            code = replace_token(code, "==this_op_weight_index==", &payload.weight_index.to_string());
            code
        }
        OpKind::NeuronInput(payload) => {
            let data_dep = payload.data_dep.expect("finalised graph");
            let next_dep = payload.next_dep.expect("finalised graph");
            let f_x_template = match payload.source {
                InputRef::Network(_) => {
                    "f_x_value = ==op_value_array==[==value_dep_op_index==];\nf_x_derivative = ==op_derivative_array==[==value_dep_op_index==];\n"
                }
                InputRef::Neuron(_) => {
                    "if(==past_index== <= available_memory_slots){\n  f_x_value = ==op_value_array==[==value_dep_op_index== - (==op_array_size== * ==past_index==)] * ==weight_array==[==this_op_weight_index==];\n  f_x_derivative = ==op_derivative_array==[==value_dep_op_index== - (==op_d_array_size== * ==past_index==)] * ==weight_array==[==this_op_weight_index==];\n  if(==this_op_weight_index== == d_w_index){\n    f_x_derivative += ==op_value_array==[==value_dep_op_index== - (==op_array_size== * ==past_index==)];\n  }\n}else{\n  f_x_value = 0.0;\n  f_x_derivative = 0.0;\n}\n"
                }
            };
            let derived = ctx
                .network
                .neuron(payload.neuron_index)
                .input_function
                .kernel_derivative_expression(
                    "f_x_value",
                    "f_x_derivative",
                    "u_x_value",
                    "u_x_derivative",
                );
            let mut code = format!(
                "u_x_value = ==op_value_array==[==next_dep_op_index==];\nu_x_derivative = ==op_derivative_array==[==next_dep_op_index==];\n{}==op_derivative_array==[==op_index==] = {};\n",
                f_x_template, derived
            );
            code = replace_token(code, "==next_dep_op_index==", &next_dep.to_string());
            code = replace_token(code, "==value_dep_op_index==", &data_dep.to_string());
            code = replace_token(code, "==past_index==", &payload.past_index.to_string());
            code = replace_token(code, "==this_op_weight_index==", &payload.weight_index.to_string());
            code
        }
        OpKind::Transfer(payload) => {
            let dep = payload.input_dep.expect("finalised graph");
            let derived = ctx
                .network
                .neuron(payload.neuron_index)
                .transfer_function
                .kernel_derivative_expression(
                    ctx.settings,
                    "==op_value_array==[==value_dep_op_index==]",
                    "==op_derivative_array==[==value_dep_op_index==]",
                );
            let code = format!("==op_derivative_array==[==op_index==] = {};\n", derived);
            replace_token(code, "==value_dep_op_index==", &dep.to_string())
        }
        OpKind::Spike(payload) => {
            let neuron = ctx.network.neuron(payload.neuron_index);
            let dep = payload.transfer_dep.expect("finalised graph");
            let for_parameter = neuron.spike_function.kernel_derivative_for_parameter(
                "==weight_array==[==this_op_weight_index==]",
                "past_value",
                "past_derivative_value",
                "==op_value_array==[==value_dep_op_index==]",
                "==op_derivative_array==[==value_dep_op_index==]",
            );
            let not_for_parameter = neuron.spike_function.kernel_derivative_not_for_parameter(
                "==weight_array==[==this_op_weight_index==]",
                "past_derivative_value",
                "==op_derivative_array==[==value_dep_op_index==]",
            );
            let mut code = format!(
                "if(0 < available_memory_slots){{\n  past_value = ==op_value_array==[==op_index== - ==op_array_size==];\n  past_derivative_value = ==op_derivative_array==[==op_index== - ==op_d_array_size==];\n}}else{{\n  past_value = 0.0;\n  past_derivative_value = 0.0;\n}}\nif(d_w_index == ==this_op_weight_index==){{\n  ==op_derivative_array==[==op_index==] = {};\n}}else{{\n  ==op_derivative_array==[==op_index==] = {};\n}}\n",
                for_parameter, not_for_parameter
            );
            code = replace_token(code, "==value_dep_op_index==", &dep.to_string());
            code = replace_token(
                code,
                "==this_op_weight_index==",
                &neuron
                    .spike_weight_index()
                    .expect("validated neuron")
                    .to_string(),
            );
            code
        }
        OpKind::Objective(payload) => {
            let dep = payload.spike_dep.expect("finalised graph");
            let derived = ctx.objective.derivative_kernel_source(
                "==label_array==[==label_index==]",
                "==op_value_array==[==dependency_op_index==]",
                "==op_derivative_array==[==dependency_op_index==]",
                &ctx.sample_count,
            );
            let mut code = format!("==op_derivative_array==[==op_index==] = {};\n", derived);
            code = replace_token(code, "==label_index==", &payload.output_index.to_string());
            code = replace_token(code, "==dependency_op_index==", &dep.to_string());
            code
        }
        OpKind::WeightRegularization(payload) => weight_regularization_derivative_source(payload, ctx),
        OpKind::SolutionFeature(_) => String::new(),
    };
    let source = replace_token(source, "==op_index==", &index);
    substitute_arrays(source, ctx.arrays)
}

/// Bulk softmax/dropout execution, emitted outside the worker switch
fn solution_feature_value_source(payload: &SolutionFeatureOp, ctx: &EmitContext<'_>) -> String {
    match payload.kind {
        FeatureKind::Softmax => {
            let mut code = String::from("feature_max = -DBL_MAX;\n");
            for &spike in &payload.spike_ops {
                code.push_str(&format!(
                    "feature_max = fmax(feature_max, ==op_value_array==[{}]);\n",
                    spike
                ));
            }
            code.push_str("feature_sum = 0.0;\n");
            for &spike in &payload.spike_ops {
                code.push_str(&format!(
                    "feature_sum += exp(==op_value_array==[{}] - feature_max);\n",
                    spike
                ));
            }
            for &spike in &payload.spike_ops {
                code.push_str(&format!(
                    "==op_value_array==[{spike}] = exp(==op_value_array==[{spike}] - feature_max) / feature_sum;\n",
                    spike = spike
                ));
            }
            code
        }
        FeatureKind::Dropout => {
            let threshold = (ctx.settings.dropout_probability * 100.0).round() as u32;
            if threshold == 0 {
                return String::new();
            }
            let mut code = String::new();
            for &spike in &payload.spike_ops {
                code.push_str(&format!(
                    "if(evaluate_network && (get_random_number(100, &feature_seed) < {})){{ ==op_value_array==[{}] = 0.0; }}\n",
                    threshold, spike
                ));
            }
            code
        }
        _ => String::new(),
    }
}

/// Penalty derivative of one weight regularisation group: the covered
/// weights answer with the penalty slope, everything else with zero
fn weight_regularization_derivative_source(
    payload: &WeightRegOp,
    ctx: &EmitContext<'_>,
) -> String {
    if payload.relevant_weights.is_empty() {
        return "==op_derivative_array==[==op_index==] = 0.0;\n".to_string();
    }
    let membership = payload
        .relevant_weights
        .iter()
        .map(|weight| format!("(d_w_index == {})", weight))
        .collect::<Vec<_>>()
        .join(" || ");
    let kind = ctx.network.feature_groups()[payload.feature_group_index as usize].kind;
    let slope = match kind {
        FeatureKind::L1Regularization => "1.0".to_string(),
        FeatureKind::L2Regularization => "(2.0 * ==weight_array==[d_w_index])".to_string(),
        _ => "0.0".to_string(),
    };
    format!(
        "==op_derivative_array==[==op_index==] = ({}) ? ({}) : 0.0;\n",
        membership, slope
    )
}
