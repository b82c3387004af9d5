//! Iterative construction of the operation graph
//!
//! Construction runs in three phases. Phase A places the terminals: one
//! objective per output neuron, then one weight regularisation node per
//! performance-relevant feature group; their count is the weight-relevant
//! operation count the data store aggregates over. Phase B drives the
//! neuron router and places one spike per neuron in reverse topological
//! order, registering dependencies as they are requested; spikes referenced
//! before their placement live in a placeholder queue and get their
//! execution index patched in on placement. Phase C resolves feature spike
//! lists, reorders the arena into execution order and verifies that every
//! dependency comes strictly later in the array.

use std::collections::HashMap;

use rann_core::{NeuronNetwork, NeuronRouter, TrainingSettings};

use crate::error::{GraphError, Result};
use crate::graph::ops::{
    DependencyParameter, NetworkInputOp, NeuronBiasOp, NeuronInputOp, ObjectiveOp, OpHandle,
    OpKind, Operation, SolutionFeatureOp, SpikeOp, TransferOp, WeightRegOp, PENDING_PLACEMENT,
};
use crate::graph::OperationGraph;

/// Builds an [`OperationGraph`] for a network
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    network: &'a NeuronNetwork,
    settings: &'a TrainingSettings,
    /// Overall label sample count of the training target, forwarded into
    /// the objective operations
    sample_count: usize,
}

/// Construction state: arena in creation order plus placement bookkeeping
struct BuildState {
    arena: Vec<Operation>,
    /// Handles in execution order; grows as operations are placed
    execution: Vec<OpHandle>,
    /// Spike placeholders referenced before placement, by neuron
    unplaced_spikes: HashMap<u32, OpHandle>,
    /// Placed spike handle per neuron
    spike_of_neuron: HashMap<u32, OpHandle>,
}

impl BuildState {
    fn push_placed(&mut self, kind: OpKind) -> OpHandle {
        let handle = self.arena.len() as OpHandle;
        self.arena
            .push(Operation::new(self.execution.len() as u32, kind));
        self.execution.push(handle);
        handle
    }
}

impl<'a> GraphBuilder<'a> {
    /// Create a builder over the given network and settings
    pub fn new(
        network: &'a NeuronNetwork,
        settings: &'a TrainingSettings,
        sample_count: usize,
    ) -> Self {
        Self {
            network,
            settings,
            sample_count,
        }
    }

    /// Run all three construction phases
    pub fn build(self) -> Result<OperationGraph> {
        let network = self.network;
        let mut state = BuildState {
            arena: Vec::new(),
            execution: Vec::new(),
            unplaced_spikes: HashMap::new(),
            spike_of_neuron: HashMap::new(),
        };

        // Phase A: terminals first. Downstream components count on the
        // objectives being the leading operations of the array.
        for output_index in 0..network.output_count() {
            state.push_placed(OpKind::Objective(ObjectiveOp {
                output_index,
                output_neuron: network.first_output_neuron() + output_index,
                spike_dep: None,
            }));
        }
        for (group_index, group) in network.feature_groups().iter().enumerate() {
            if group.kind.is_performance_relevant() {
                let mut reg = WeightRegOp {
                    feature_group_index: group_index as u32,
                    relevant_weights: Vec::new(),
                    weight_derivatives: vec![0.0; network.weight_count()],
                };
                reg.refresh(network);
                state.push_placed(OpKind::WeightRegularization(reg));
            }
        }
        let weight_relevant_count = state.execution.len();

        // Phase B: collect subsets, newest in front, so the neurons
        // depending on everything land at the head of the array. The first
        // collection may relax strictness; within a relaxed subset order
        // carries the dependencies, hence the per-subset reversal.
        let mut router = NeuronRouter::new(network);
        let mut subsets: Vec<Vec<u32>> = Vec::new();
        let mut features_of_spike: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut strict = false;
        while !router.finished() {
            router.collect_subset(
                self.settings.max_solve_threads,
                self.settings.device_max_megabytes,
                strict,
            );
            if router.subset().is_empty() {
                return Err(GraphError::RouterStalled {
                    reason: "no neuron is solvable; the descriptor should not have validated"
                        .into(),
                });
            }
            subsets.insert(0, router.subset().iter().rev().copied().collect());
            let members: Vec<u32> = router.subset().iter().copied().collect();
            for neuron_index in members {
                let solved = router.confirm_first_subset_element_processed(neuron_index)?;
                for group_index in solved {
                    let kind = network.feature_groups()[group_index as usize].kind;
                    // Boltzmann recurrence is structural; it needs no
                    // execution node of its own
                    if kind.is_solution_relevant()
                        && kind != rann_core::FeatureKind::BoltzmannKnot
                    {
                        features_of_spike
                            .entry(neuron_index)
                            .or_default()
                            .push(group_index);
                    }
                }
            }
            strict = true;
        }

        let mut done_index = 0usize;
        for subset in &subsets {
            for &neuron_index in subset {
                let triggered = features_of_spike
                    .get(&neuron_index)
                    .cloned()
                    .unwrap_or_default();
                let mut feature_handles = Vec::with_capacity(triggered.len());
                for group_index in triggered {
                    let kind = network.feature_groups()[group_index as usize].kind;
                    let feature_handle =
                        state.push_placed(OpKind::SolutionFeature(SolutionFeatureOp {
                            feature_group_index: group_index,
                            kind,
                            spike_ops: Vec::new(),
                        }));
                    log::debug!(
                        "operation[{}]: {:?} feature for group {}, triggered by neuron {}",
                        state.arena[feature_handle as usize].index,
                        kind,
                        group_index,
                        neuron_index
                    );
                    // execution runs backwards, so the feature sits in
                    // front of its spike and every earlier operation waits
                    // for it
                    for &placed in state.execution[..state.execution.len() - 1].iter() {
                        state.arena[placed as usize]
                            .added_dependencies
                            .push(feature_handle);
                    }
                    feature_handles.push(feature_handle);
                }
                let spike_handle = place_spike(&mut state, neuron_index);
                for feature_handle in feature_handles {
                    state.arena[feature_handle as usize]
                        .added_dependencies
                        .push(spike_handle);
                }

                // register dependencies for everything placed so far
                while done_index < state.execution.len() {
                    let handle = state.execution[done_index];
                    if !state.arena[handle as usize].are_dependencies_registered() {
                        match state.arena[handle as usize].dependency_request() {
                            Some(parameters) => {
                                let mut resolved = Vec::with_capacity(parameters.len());
                                for parameter in parameters {
                                    resolved.push(self.push_dependency(&mut state, parameter));
                                }
                                state.arena[handle as usize]
                                    .register_dependencies(&resolved)?;
                            }
                            None => {
                                state.arena[handle as usize].dependencies_registered = true;
                            }
                        }
                    }
                    done_index += 1;
                }
            }
        }

        // Phase C: placeholders must all have been placed, feature nodes
        // learn their spike lists, and the arena is reordered so position
        // equals execution index.
        if !state.unplaced_spikes.is_empty() {
            return Err(GraphError::UnplacedOperations {
                count: state.unplaced_spikes.len(),
            });
        }
        for handle in 0..state.arena.len() {
            if let OpKind::SolutionFeature(feature) = &state.arena[handle].kind {
                let group =
                    &network.feature_groups()[feature.feature_group_index as usize];
                let mut spike_ops = Vec::new();
                for neuron_index in group.iter_neurons() {
                    let spike = state
                        .spike_of_neuron
                        .get(&neuron_index)
                        .copied()
                        .ok_or(GraphError::MissingSpike { neuron_index })?;
                    spike_ops.push(spike);
                }
                if let OpKind::SolutionFeature(feature) = &mut state.arena[handle].kind {
                    feature.spike_ops = spike_ops;
                }
            }
        }

        let graph = finalise(state, network, weight_relevant_count, self.sample_count)?;
        log::info!(
            "built autodiff operation graph: {} operations, {} weight relevant",
            graph.operations().len(),
            weight_relevant_count
        );
        Ok(graph)
    }

    /// Resolve one dependency parameter into an operation handle, creating
    /// the operation when no existing one satisfies the request
    fn push_dependency(&self, state: &mut BuildState, parameter: DependencyParameter) -> OpHandle {
        match parameter {
            DependencyParameter::Spike { neuron_index } => {
                find_or_queue_spike(state, neuron_index)
            }
            DependencyParameter::Transfer { neuron_index } => {
                let has_inputs = self.network.neuron(neuron_index).input_count() > 0;
                state.push_placed(OpKind::Transfer(TransferOp {
                    neuron_index,
                    has_inputs,
                    input_dep: None,
                }))
            }
            DependencyParameter::NeuronInput {
                neuron_index,
                input_slot,
            } => {
                let neuron = self.network.neuron(neuron_index);
                let (source, past_index) = neuron
                    .input_ref(input_slot)
                    .expect("input slots requested in order never leave the neuron");
                let weight_index = neuron
                    .weight_index(1 + input_slot)
                    .expect("validated neurons pair every input with a weight");
                let is_last_input = input_slot + 1 == neuron.input_count();
                state.push_placed(OpKind::NeuronInput(NeuronInputOp {
                    neuron_index,
                    input_slot,
                    weight_index,
                    past_index,
                    source,
                    is_last_input,
                    data_dep: None,
                    next_dep: None,
                }))
            }
            DependencyParameter::NeuronBias {
                neuron_index,
                weight_slot,
            } => {
                let neuron = self.network.neuron(neuron_index);
                let weight_index = neuron
                    .weight_index(weight_slot)
                    .expect("bias slots requested in order never leave the neuron");
                let is_last_weight = weight_slot + 1 == neuron.weight_count();
                state.push_placed(OpKind::NeuronBias(NeuronBiasOp {
                    neuron_index,
                    weight_slot,
                    weight_index,
                    is_last_weight,
                    next_dep: None,
                }))
            }
            DependencyParameter::NetworkInput {
                input_index,
                weight_index,
            } => state.push_placed(OpKind::NetworkInput(NetworkInputOp {
                input_index,
                weight_index,
            })),
        }
    }
}

/// Place the spike of a neuron, re-using a queued placeholder when present
fn place_spike(state: &mut BuildState, neuron_index: u32) -> OpHandle {
    let handle = if let Some(handle) = state.unplaced_spikes.remove(&neuron_index) {
        state.arena[handle as usize].index = state.execution.len() as u32;
        state.execution.push(handle);
        log::debug!(
            "operation[{}]: spike of neuron {} inserted from the placeholder queue",
            state.arena[handle as usize].index,
            neuron_index
        );
        handle
    } else {
        state.push_placed(OpKind::Spike(SpikeOp {
            neuron_index,
            transfer_dep: None,
        }))
    };
    state.spike_of_neuron.insert(neuron_index, handle);
    handle
}

/// Find the spike of a neuron among placed or queued operations, queueing a
/// placeholder when it exists nowhere yet
fn find_or_queue_spike(state: &mut BuildState, neuron_index: u32) -> OpHandle {
    if let Some(&handle) = state.spike_of_neuron.get(&neuron_index) {
        return handle;
    }
    if let Some(&handle) = state.unplaced_spikes.get(&neuron_index) {
        return handle;
    }
    let handle = state.arena.len() as OpHandle;
    state.arena.push(Operation::new(
        PENDING_PLACEMENT,
        OpKind::Spike(SpikeOp {
            neuron_index,
            transfer_dep: None,
        }),
    ));
    state.unplaced_spikes.insert(neuron_index, handle);
    log::debug!("spike of neuron {} queued for later placement", neuron_index);
    handle
}

/// Reorder the arena into execution order, remap every dependency handle to
/// its execution index and verify the dependency-order invariant
fn finalise(
    state: BuildState,
    network: &NeuronNetwork,
    weight_relevant_count: usize,
    sample_count: usize,
) -> Result<OperationGraph> {
    let BuildState {
        mut arena,
        execution,
        spike_of_neuron,
        ..
    } = state;

    let index_of_handle: Vec<u32> = arena.iter().map(|op| op.index).collect();
    let remap = |handle: OpHandle| index_of_handle[handle as usize];

    for op in &mut arena {
        debug_assert!(op.operation_index_finalised());
        match &mut op.kind {
            OpKind::Objective(o) => o.spike_dep = o.spike_dep.map(remap),
            OpKind::Spike(o) => o.transfer_dep = o.transfer_dep.map(remap),
            OpKind::Transfer(o) => o.input_dep = o.input_dep.map(remap),
            OpKind::NeuronInput(o) => {
                o.data_dep = o.data_dep.map(remap);
                o.next_dep = o.next_dep.map(remap);
            }
            OpKind::NeuronBias(o) => o.next_dep = o.next_dep.map(remap),
            OpKind::SolutionFeature(o) => {
                for spike in &mut o.spike_ops {
                    *spike = remap(*spike);
                }
            }
            OpKind::NetworkInput(_) | OpKind::WeightRegularization(_) => {}
        }
        for added in &mut op.added_dependencies {
            *added = remap(*added);
        }
    }

    let mut ordered: Vec<Option<Operation>> = (0..execution.len()).map(|_| None).collect();
    for op in arena {
        let index = op.index as usize;
        debug_assert!(ordered[index].is_none());
        ordered[index] = Some(op);
    }
    let operations: Vec<Operation> = ordered
        .into_iter()
        .map(|op| op.expect("every execution index is assigned exactly once"))
        .collect();

    // every dependency must sit strictly deeper in the array
    for (index, op) in operations.iter().enumerate() {
        if !op.are_dependencies_registered() {
            return Err(GraphError::UnplacedOperations { count: 1 });
        }
        for dependency in op.ordering_dependencies() {
            if dependency as usize <= index {
                return Err(GraphError::DependencyOrder {
                    operation_index: index as u32,
                    dependency_index: dependency,
                });
            }
        }
    }

    let spike_index_of_neuron: HashMap<u32, u32> = spike_of_neuron
        .into_iter()
        .map(|(neuron, handle)| (neuron, index_of_handle[handle as usize]))
        .collect();
    let mut output_spikes = Vec::with_capacity(network.output_count() as usize);
    for output_index in 0..network.output_count() {
        let neuron_index = network.first_output_neuron() + output_index;
        let spike = spike_index_of_neuron
            .get(&neuron_index)
            .copied()
            .ok_or(GraphError::MissingSpike { neuron_index })?;
        output_spikes.push(spike);
    }

    Ok(OperationGraph::from_parts(
        operations,
        weight_relevant_count,
        sample_count,
        spike_index_of_neuron,
        output_spikes,
    ))
}
