//! Operation kinds of the autodiff graph
//!
//! Every node of the graph is a tagged [`Operation`]: a common header
//! (execution index, processed flags, registration state) plus a kind
//! specific payload. Dependencies are discovered through a request/register
//! protocol: a node describes the operations it needs as
//! [`DependencyParameter`] values, the builder resolves each into an
//! existing or freshly appended node and hands the handles back through
//! [`Operation::register_dependencies`].
//!
//! Once the graph is finalised every dependency field holds the execution
//! index of its target, so the sweeps read neighbour state through the data
//! store alone.

use smallvec::SmallVec;

use rann_core::{
    FeatureKind, InputRef, NeuronNetwork, TrainingSettings,
};
use rann_data::{BackpropDataStore, ValueView, WeightColumn};

use crate::error::{GraphError, Result};
use crate::objective::Objective;

/// Handle of an operation inside the graph arena
pub type OpHandle = u32;

/// Sentinel execution index of a spike placeholder awaiting placement
pub const PENDING_PLACEMENT: u32 = u32::MAX;

/// Kind tag without payload, used for grouping and local declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    /// Objective operation
    Objective,
    /// Spike function operation
    Spike,
    /// Transfer function operation
    Transfer,
    /// Neuron input slot operation
    NeuronInput,
    /// Neuron bias slot operation
    NeuronBias,
    /// Network input operation
    NetworkInput,
    /// Weight regularisation feature operation
    WeightRegularization,
    /// Solution feature execution operation
    SolutionFeature,
}

/// Description of a dependency an operation asks the builder to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyParameter {
    /// The spike operation of a neuron
    Spike {
        /// Index of the neuron
        neuron_index: u32,
    },
    /// The transfer operation of a neuron
    Transfer {
        /// Index of the neuron
        neuron_index: u32,
    },
    /// One input slot operation of a neuron
    NeuronInput {
        /// Index of the neuron
        neuron_index: u32,
        /// Input slot inside the neuron
        input_slot: u32,
    },
    /// One bias slot operation of a neuron
    NeuronBias {
        /// Index of the neuron
        neuron_index: u32,
        /// Weight slot inside the neuron (spike weight is slot zero)
        weight_slot: u32,
    },
    /// A weighted network input operation
    NetworkInput {
        /// Index into the network input array
        input_index: u32,
        /// Weight applied to the input
        weight_index: u32,
    },
}

/// Objective payload: derivative of the cost by one output neuron
#[derive(Debug, Clone)]
pub struct ObjectiveOp {
    /// Which network output this objective compares against the label
    pub output_index: u32,
    /// Absolute neuron index of the matching output neuron
    pub output_neuron: u32,
    /// Spike operation of the matching output neuron
    pub spike_dep: Option<OpHandle>,
}

/// Spike payload: state blend over the neuron's previous output
#[derive(Debug, Clone)]
pub struct SpikeOp {
    /// The neuron the spike belongs to
    pub neuron_index: u32,
    /// Transfer operation of the same neuron
    pub transfer_dep: Option<OpHandle>,
}

/// Transfer payload: activation over the collected inputs
#[derive(Debug, Clone)]
pub struct TransferOp {
    /// The neuron the activation belongs to
    pub neuron_index: u32,
    /// Whether the neuron has any inputs; bias-only neurons feed the
    /// activation from their first bias slot instead
    pub has_inputs: bool,
    /// First input slot operation, or the first bias slot for bias-only neurons
    pub input_dep: Option<OpHandle>,
}

/// Neuron input payload: one weighted input folded into the running reduction
#[derive(Debug, Clone)]
pub struct NeuronInputOp {
    /// The neuron the input slot belongs to
    pub neuron_index: u32,
    /// Input slot inside the neuron
    pub input_slot: u32,
    /// Weight applied to this input
    pub weight_index: u32,
    /// Time steps backwards the input value is read from
    pub past_index: u32,
    /// Where the input value comes from
    pub source: InputRef,
    /// Whether this is the final input slot of the neuron
    pub is_last_input: bool,
    /// Producer of the input value: a network input operation or the spike
    /// of the source neuron
    pub data_dep: Option<OpHandle>,
    /// The rest of the reduction: the next input slot, or the first bias
    /// slot after the last input
    pub next_dep: Option<OpHandle>,
}

/// Neuron bias payload: one bias weight folded into the running reduction
#[derive(Debug, Clone)]
pub struct NeuronBiasOp {
    /// The neuron the bias slot belongs to
    pub neuron_index: u32,
    /// Weight slot inside the neuron
    pub weight_slot: u32,
    /// Weight table index of the bias
    pub weight_index: u32,
    /// Whether this is the final weight of the neuron
    pub is_last_weight: bool,
    /// The next bias slot, absent on the final weight
    pub next_dep: Option<OpHandle>,
}

/// Network input payload: one input scaled by its weight
#[derive(Debug, Clone)]
pub struct NetworkInputOp {
    /// Index into the network input array
    pub input_index: u32,
    /// Weight applied to the input
    pub weight_index: u32,
}

/// Weight regularisation payload: per-weight penalty derivatives of one
/// performance-relevant feature group
#[derive(Debug, Clone)]
pub struct WeightRegOp {
    /// Index of the feature group inside the network descriptor
    pub feature_group_index: u32,
    /// Expanded weight indices the penalty covers
    pub relevant_weights: Vec<u32>,
    /// Penalty derivative per weight table slot
    pub weight_derivatives: Vec<f64>,
}

impl WeightRegOp {
    /// Collect the covered weights and their penalty derivatives
    pub fn refresh(&mut self, network: &NeuronNetwork) {
        let kind = network.feature_groups()[self.feature_group_index as usize].kind;
        self.relevant_weights.clear();
        self.weight_derivatives.fill(0.0);
        let group = &network.feature_groups()[self.feature_group_index as usize];
        for neuron_index in group.iter_neurons() {
            for weight_index in network.neuron(neuron_index).iter_weight_indices() {
                self.relevant_weights.push(weight_index);
                self.weight_derivatives[weight_index as usize] = match kind {
                    FeatureKind::L1Regularization => 1.0,
                    FeatureKind::L2Regularization => 2.0 * network.weight(weight_index),
                    _ => 0.0,
                };
            }
        }
    }
}

/// Solution feature payload: a bulk operation over the spikes of a group
#[derive(Debug, Clone)]
pub struct SolutionFeatureOp {
    /// Index of the feature group inside the network descriptor
    pub feature_group_index: u32,
    /// The feature applied by this node
    pub kind: FeatureKind,
    /// Spike operations of the group's neurons, resolved at finalisation
    pub spike_ops: Vec<OpHandle>,
}

/// Kind specific payload of an operation
#[derive(Debug, Clone)]
pub enum OpKind {
    /// Objective operation
    Objective(ObjectiveOp),
    /// Spike function operation
    Spike(SpikeOp),
    /// Transfer function operation
    Transfer(TransferOp),
    /// Neuron input slot operation
    NeuronInput(NeuronInputOp),
    /// Neuron bias slot operation
    NeuronBias(NeuronBiasOp),
    /// Network input operation
    NetworkInput(NetworkInputOp),
    /// Weight regularisation feature operation
    WeightRegularization(WeightRegOp),
    /// Solution feature execution operation
    SolutionFeature(SolutionFeatureOp),
}

/// One node of the operation graph
#[derive(Debug, Clone)]
pub struct Operation {
    /// Execution index; [`PENDING_PLACEMENT`] until a queued spike is placed
    pub(crate) index: u32,
    /// Kind specific payload
    pub(crate) kind: OpKind,
    pub(crate) value_processed: bool,
    pub(crate) derivative_processed: bool,
    pub(crate) dependencies_registered: bool,
    /// Ordering-only dependencies added from the outside (solution features)
    pub(crate) added_dependencies: SmallVec<[OpHandle; 2]>,
}

impl Operation {
    /// Create an operation with the given execution index
    pub(crate) fn new(index: u32, kind: OpKind) -> Self {
        Self {
            index,
            kind,
            value_processed: false,
            derivative_processed: false,
            dependencies_registered: false,
            added_dependencies: SmallVec::new(),
        }
    }

    /// Execution index of this operation
    pub fn operation_index(&self) -> u32 {
        self.index
    }

    /// Whether the execution index has left the placeholder state
    pub fn operation_index_finalised(&self) -> bool {
        self.index != PENDING_PLACEMENT
    }

    /// Kind payload
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Kind tag
    pub fn tag(&self) -> OpTag {
        match &self.kind {
            OpKind::Objective(_) => OpTag::Objective,
            OpKind::Spike(_) => OpTag::Spike,
            OpKind::Transfer(_) => OpTag::Transfer,
            OpKind::NeuronInput(_) => OpTag::NeuronInput,
            OpKind::NeuronBias(_) => OpTag::NeuronBias,
            OpKind::NetworkInput(_) => OpTag::NetworkInput,
            OpKind::WeightRegularization(_) => OpTag::WeightRegularization,
            OpKind::SolutionFeature(_) => OpTag::SolutionFeature,
        }
    }

    /// Whether the dependency protocol has completed for this node
    pub fn are_dependencies_registered(&self) -> bool {
        self.dependencies_registered
    }

    /// Whether the forward value of the current step has been computed
    pub fn is_value_processed(&self) -> bool {
        self.value_processed
    }

    /// Whether both sweeps of the current step have completed
    pub fn is_processed(&self) -> bool {
        self.value_processed && self.derivative_processed
    }

    /// Describe the dependencies this operation needs resolved
    ///
    /// `None` means the operation has no dependencies at all and is
    /// registered on the spot by the builder.
    pub fn dependency_request(&self) -> Option<Vec<DependencyParameter>> {
        match &self.kind {
            OpKind::Objective(op) => Some(vec![DependencyParameter::Spike {
                neuron_index: op.output_neuron,
            }]),
            OpKind::Spike(op) => Some(vec![DependencyParameter::Transfer {
                neuron_index: op.neuron_index,
            }]),
            OpKind::Transfer(op) => Some(vec![if op.has_inputs {
                DependencyParameter::NeuronInput {
                    neuron_index: op.neuron_index,
                    input_slot: 0,
                }
            } else {
                DependencyParameter::NeuronBias {
                    neuron_index: op.neuron_index,
                    weight_slot: 1,
                }
            }]),
            OpKind::NeuronInput(op) => {
                let mut parameters = Vec::with_capacity(2);
                parameters.push(match op.source {
                    InputRef::Neuron(neuron_index) => {
                        DependencyParameter::Spike { neuron_index }
                    }
                    InputRef::Network(input_index) => DependencyParameter::NetworkInput {
                        input_index,
                        weight_index: op.weight_index,
                    },
                });
                parameters.push(if op.is_last_input {
                    // spike weight precedes the inputs, so the first bias
                    // slot sits one past the last input slot
                    DependencyParameter::NeuronBias {
                        neuron_index: op.neuron_index,
                        weight_slot: 1 + op.input_slot + 1,
                    }
                } else {
                    DependencyParameter::NeuronInput {
                        neuron_index: op.neuron_index,
                        input_slot: op.input_slot + 1,
                    }
                });
                Some(parameters)
            }
            OpKind::NeuronBias(op) => {
                if op.is_last_weight {
                    None
                } else {
                    Some(vec![DependencyParameter::NeuronBias {
                        neuron_index: op.neuron_index,
                        weight_slot: op.weight_slot + 1,
                    }])
                }
            }
            OpKind::NetworkInput(_)
            | OpKind::WeightRegularization(_)
            | OpKind::SolutionFeature(_) => None,
        }
    }

    /// Store the handles resolved for a previous [`Operation::dependency_request`]
    pub fn register_dependencies(&mut self, handles: &[OpHandle]) -> Result<()> {
        let expect = |expected: usize| -> Result<()> {
            if handles.len() == expected {
                Ok(())
            } else {
                Err(GraphError::DependencyCountMismatch {
                    operation_index: self.index,
                    expected,
                    got: handles.len(),
                })
            }
        };
        match &mut self.kind {
            OpKind::Objective(op) => {
                expect(1)?;
                op.spike_dep = Some(handles[0]);
            }
            OpKind::Spike(op) => {
                expect(1)?;
                op.transfer_dep = Some(handles[0]);
            }
            OpKind::Transfer(op) => {
                expect(1)?;
                op.input_dep = Some(handles[0]);
            }
            OpKind::NeuronInput(op) => {
                expect(2)?;
                op.data_dep = Some(handles[0]);
                op.next_dep = Some(handles[1]);
            }
            OpKind::NeuronBias(op) => {
                expect(1)?;
                op.next_dep = Some(handles[0]);
            }
            OpKind::NetworkInput(_)
            | OpKind::WeightRegularization(_)
            | OpKind::SolutionFeature(_) => expect(0)?,
        }
        self.dependencies_registered = true;
        Ok(())
    }

    /// Dependencies constraining the execution order
    ///
    /// Past-reaching input edges are data lookups against the ring buffer,
    /// not scheduling constraints, so they are left out here.
    pub fn ordering_dependencies(&self) -> SmallVec<[OpHandle; 4]> {
        let mut dependencies: SmallVec<[OpHandle; 4]> = SmallVec::new();
        match &self.kind {
            OpKind::Objective(op) => dependencies.extend(op.spike_dep),
            OpKind::Spike(op) => dependencies.extend(op.transfer_dep),
            OpKind::Transfer(op) => dependencies.extend(op.input_dep),
            OpKind::NeuronInput(op) => {
                if op.past_index == 0 {
                    dependencies.extend(op.data_dep);
                }
                dependencies.extend(op.next_dep);
            }
            OpKind::NeuronBias(op) => dependencies.extend(op.next_dep),
            OpKind::NetworkInput(_)
            | OpKind::WeightRegularization(_)
            | OpKind::SolutionFeature(_) => {}
        }
        dependencies.extend(self.added_dependencies.iter().copied());
        dependencies
    }

    /// Forward value of scalar operations; `None` for the node kinds that
    /// produce no single cell (objectives, features)
    pub(crate) fn compute_value(
        &self,
        self_index: usize,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        store: &BackpropDataStore,
        input: &[f64],
    ) -> Option<f64> {
        match &self.kind {
            OpKind::NetworkInput(op) => {
                Some(input[op.input_index as usize] * network.weight(op.weight_index))
            }
            OpKind::NeuronBias(op) => {
                let weight = network.weight(op.weight_index);
                Some(match op.next_dep {
                    Some(next) => network
                        .neuron(op.neuron_index)
                        .input_function
                        .collect(weight, store.get_value(0, next as usize)),
                    None => weight,
                })
            }
            OpKind::NeuronInput(op) => {
                let data_dep = op.data_dep.expect("dependencies registered") as usize;
                let next_dep = op.next_dep.expect("dependencies registered") as usize;
                // i(w) = w * f(w) ¤ u(w); network input producers are
                // already weighted, neuron data is weighted here
                let f_x = match op.source {
                    InputRef::Network(_) => store.get_value(0, data_dep),
                    InputRef::Neuron(_) => {
                        store.get_value(op.past_index, data_dep) * network.weight(op.weight_index)
                    }
                };
                let u_x = store.get_value(0, next_dep);
                Some(
                    network
                        .neuron(op.neuron_index)
                        .input_function
                        .collect(f_x, u_x),
                )
            }
            OpKind::Transfer(op) => {
                let dep = op.input_dep.expect("dependencies registered") as usize;
                Some(
                    network
                        .neuron(op.neuron_index)
                        .transfer_function
                        .value(settings, store.get_value(0, dep)),
                )
            }
            OpKind::Spike(op) => {
                let neuron = network.neuron(op.neuron_index);
                let parameter =
                    network.weight(neuron.spike_weight_index().expect("validated neuron"));
                let dep = op.transfer_dep.expect("dependencies registered") as usize;
                let past_value = store.get_value(1, self_index);
                Some(neuron.spike_function.value(
                    parameter,
                    store.get_value(0, dep),
                    past_value,
                ))
            }
            // objective values feed nothing downstream and feature nodes
            // are executed in bulk by the sweep itself
            OpKind::Objective(_)
            | OpKind::WeightRegularization(_)
            | OpKind::SolutionFeature(_) => None,
        }
    }

    /// Derivative of this operation by the column's weight; `None` for the
    /// node kinds that contribute no derivative cell
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compute_derivative(
        &self,
        self_index: usize,
        network: &NeuronNetwork,
        settings: &TrainingSettings,
        objective: &Objective,
        sample_count: f64,
        input: &[f64],
        labels: &[f64],
        column: &WeightColumn<'_>,
        values: &ValueView<'_>,
    ) -> Option<f64> {
        let d_w_index = column.weight_index() as u32;
        match &self.kind {
            OpKind::NetworkInput(op) => Some(if d_w_index == op.weight_index {
                input[op.input_index as usize]
            } else {
                0.0
            }),
            OpKind::NeuronBias(op) => {
                let weight = network.weight(op.weight_index);
                let own = if d_w_index == op.weight_index { 1.0 } else { 0.0 };
                Some(match op.next_dep {
                    Some(next) => {
                        let next = next as usize;
                        network.neuron(op.neuron_index).input_function.derivative(
                            weight,
                            own,
                            values.get(0, next),
                            column.derivative(0, next),
                        )
                    }
                    None => own,
                })
            }
            OpKind::NeuronInput(op) => {
                let data_dep = op.data_dep.expect("dependencies registered") as usize;
                let next_dep = op.next_dep.expect("dependencies registered") as usize;
                let weight = network.weight(op.weight_index);
                let (f_x, f_x_d) = match op.source {
                    InputRef::Network(_) => (
                        values.get(0, data_dep),
                        column.derivative(0, data_dep),
                    ),
                    InputRef::Neuron(_) => {
                        let source_value = values.get(op.past_index, data_dep);
                        let mut derivative =
                            column.derivative(op.past_index, data_dep) * weight;
                        if d_w_index == op.weight_index {
                            derivative += source_value;
                        }
                        (source_value * weight, derivative)
                    }
                };
                let u_x = values.get(0, next_dep);
                let u_x_d = column.derivative(0, next_dep);
                Some(
                    network
                        .neuron(op.neuron_index)
                        .input_function
                        .derivative(f_x, f_x_d, u_x, u_x_d),
                )
            }
            OpKind::Transfer(op) => {
                let dep = op.input_dep.expect("dependencies registered") as usize;
                // d t(f(w))/dw = t'(f(w)) * f'(w)
                Some(network.neuron(op.neuron_index).transfer_function.derivative(
                    settings,
                    values.get(0, dep),
                    column.derivative(0, dep),
                ))
            }
            OpKind::Spike(op) => {
                let neuron = network.neuron(op.neuron_index);
                let spike_weight = neuron.spike_weight_index().expect("validated neuron");
                let parameter = network.weight(spike_weight);
                let dep = op.transfer_dep.expect("dependencies registered") as usize;
                Some(if d_w_index == spike_weight {
                    neuron.spike_function.derivative_for_parameter(
                        parameter,
                        values.get(1, self_index),
                        column.derivative(1, self_index),
                        values.get(0, dep),
                        column.derivative(0, dep),
                    )
                } else {
                    neuron.spike_function.derivative_not_for_parameter(
                        parameter,
                        column.derivative(1, self_index),
                        column.derivative(0, dep),
                    )
                })
            }
            OpKind::Objective(op) => {
                let dep = op.spike_dep.expect("dependencies registered") as usize;
                Some(objective.derivative(
                    labels[op.output_index as usize],
                    values.get(0, dep),
                    column.derivative(0, dep),
                    sample_count,
                ))
            }
            OpKind::WeightRegularization(op) => {
                Some(op.weight_derivatives[d_w_index as usize])
            }
            OpKind::SolutionFeature(_) => None,
        }
    }
}
