//! Builder for layered dense networks

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::smallvec;

use crate::error::{CoreError, Result};
use crate::function::{InputFunction, SpikeFunction, TransferFunction};
use crate::network::{FeatureGroup, FeatureKind, Neuron, NeuronNetwork};
use crate::synapse::{IndexSynapse, InputSynapse, WeightSynapse};

/// Weight, bias and memory-filter initialisation for dense layers
///
/// Weight amplitudes are scaled by the expected input count of the layer;
/// rectifier-family transfer functions use Kaiming-style scaling.
#[derive(Debug)]
struct DenseWeightInitializer {
    expected_input_count: f64,
    expected_input_max: f64,
    epsilon: f64,
    zetta: f64,
}

impl DenseWeightInitializer {
    fn new(epsilon: f64, zetta: f64) -> Self {
        Self {
            expected_input_count: 1.0,
            expected_input_max: 1.0,
            epsilon,
            zetta,
        }
    }

    fn set_context(&mut self, input_count: u32, expected_input_max: f64) {
        self.expected_input_count = (input_count as f64).max(1.0);
        self.expected_input_max = expected_input_max.abs().max(f64::EPSILON);
    }

    fn weight_amplitude(&self, transfer: TransferFunction) -> f64 {
        let amplitude = match transfer {
            TransferFunction::Elu | TransferFunction::Relu | TransferFunction::Selu => {
                (2.0 / self.expected_input_count).sqrt()
            }
            _ => (2.0 / (self.expected_input_count * self.expected_input_max)).sqrt(),
        };
        amplitude.max(self.epsilon)
    }

    fn next_weight_for<R: Rng>(&self, transfer: TransferFunction, rng: &mut R) -> f64 {
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        sign * rng.gen_range(0.0..self.weight_amplitude(transfer))
    }

    fn next_memory_filter<R: Rng>(&self, rng: &mut R) -> f64 {
        rng.gen_range(0.0..1.0)
    }

    fn next_bias<R: Rng>(&self, rng: &mut R) -> f64 {
        // non-zero amplitude keeps ReLU and friends firing right away in training
        (self.zetta / -2.0) + rng.gen_range(0.0..=1.0) * self.zetta
    }
}

/// Builder assembling a dense layered [`NeuronNetwork`]
///
/// Layer-wide allowed function sets bound the random assignment; per-neuron
/// overrides narrow the choice to one function and fail when they fall
/// outside an explicit layer filter. Recurrence is expressed either per
/// neuron (self loops at a chosen reach-past) or per layer through the
/// `BoltzmannKnot` feature.
#[derive(Debug)]
pub struct NetworkBuilder {
    input_size: Option<u32>,
    output_count: Option<u32>,
    expected_input_range: f64,
    allowed_transfer_functions: Option<Vec<Vec<TransferFunction>>>,
    allowed_input_functions: Vec<InputFunction>,
    allowed_spike_functions: Vec<SpikeFunction>,
    input_overrides: BTreeMap<(u32, u32), InputFunction>,
    transfer_overrides: BTreeMap<(u32, u32), TransferFunction>,
    spike_overrides: BTreeMap<(u32, u32), SpikeFunction>,
    recurrences: BTreeMap<(u32, u32), Vec<u32>>,
    layer_features: BTreeMap<u32, Vec<FeatureKind>>,
    epsilon: f64,
    zetta: f64,
    seed: Option<u64>,
}

impl NetworkBuilder {
    /// Create a builder with the default allowed function sets
    pub fn new() -> Self {
        Self {
            input_size: None,
            output_count: None,
            expected_input_range: 1.0,
            allowed_transfer_functions: None,
            allowed_input_functions: vec![InputFunction::Add],
            allowed_spike_functions: vec![SpikeFunction::Memory],
            input_overrides: BTreeMap::new(),
            transfer_overrides: BTreeMap::new(),
            spike_overrides: BTreeMap::new(),
            recurrences: BTreeMap::new(),
            layer_features: BTreeMap::new(),
            epsilon: 1e-8,
            zetta: 0.3,
            seed: None,
        }
    }

    /// Set the number of expected network inputs
    pub fn input_size(mut self, size: u32) -> Self {
        self.input_size = Some(size);
        self
    }

    /// Set the number of expected outputs; must match the last layer size
    pub fn output_count(mut self, count: u32) -> Self {
        self.output_count = Some(count);
        self
    }

    /// Set the expected amplitude of the network inputs
    pub fn expected_input_range(mut self, range: f64) -> Self {
        self.expected_input_range = range.abs();
        self
    }

    /// Restrict transfer functions per layer; one set per layer is mandatory
    pub fn allowed_transfer_functions_by_layer(
        mut self,
        filter: Vec<Vec<TransferFunction>>,
    ) -> Self {
        self.allowed_transfer_functions = Some(filter);
        self
    }

    /// Set the input functions picked from when no override applies
    pub fn allowed_input_functions(mut self, allowed: Vec<InputFunction>) -> Self {
        self.allowed_input_functions = allowed;
        self
    }

    /// Set the spike functions picked from when no override applies
    pub fn allowed_spike_functions(mut self, allowed: Vec<SpikeFunction>) -> Self {
        self.allowed_spike_functions = allowed;
        self
    }

    /// Fix the input function of one neuron
    pub fn set_neuron_input_function(
        mut self,
        layer_index: u32,
        layer_neuron_index: u32,
        function: InputFunction,
    ) -> Self {
        self.input_overrides
            .insert((layer_index, layer_neuron_index), function);
        self
    }

    /// Fix the transfer function of one neuron
    pub fn set_neuron_transfer_function(
        mut self,
        layer_index: u32,
        layer_neuron_index: u32,
        function: TransferFunction,
    ) -> Self {
        self.transfer_overrides
            .insert((layer_index, layer_neuron_index), function);
        self
    }

    /// Fix the spike function of one neuron
    pub fn set_neuron_spike_function(
        mut self,
        layer_index: u32,
        layer_neuron_index: u32,
        function: SpikeFunction,
    ) -> Self {
        self.spike_overrides
            .insert((layer_index, layer_neuron_index), function);
        self
    }

    /// Make one neuron take its own output from `reach_past` steps back as input
    pub fn add_neuron_recurrence(
        mut self,
        layer_index: u32,
        layer_neuron_index: u32,
        reach_past: u32,
    ) -> Self {
        self.recurrences
            .entry((layer_index, layer_neuron_index))
            .or_default()
            .push(reach_past);
        self
    }

    /// Attach a feature to a whole layer
    pub fn add_feature_to_layer(mut self, layer_index: u32, feature: FeatureKind) -> Self {
        let features = self.layer_features.entry(layer_index).or_default();
        if !features.contains(&feature) {
            features.push(feature);
        }
        self
    }

    /// Set the RNG seed for reproducible construction
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build a fully connected network with the given layer sizes
    pub fn dense_layers(self, layer_sizes: &[u32]) -> Result<NeuronNetwork> {
        let input_size = self.input_size.ok_or(CoreError::MissingArgument {
            argument: "input_size",
        })?;
        if layer_sizes.is_empty() {
            return Err(CoreError::MissingArgument {
                argument: "layer_sizes",
            });
        }
        if let Some(index) = layer_sizes.iter().position(|&size| size == 0) {
            return Err(CoreError::EmptyLayer {
                layer_index: index as u32,
            });
        }
        if let Some(filter) = &self.allowed_transfer_functions {
            if filter.len() != layer_sizes.len() {
                return Err(CoreError::invalid_parameter(
                    "allowed_transfer_functions_by_layer",
                    filter.len().to_string(),
                    format!("one entry per layer ({})", layer_sizes.len()),
                ));
            }
        }
        let output_count = *layer_sizes.last().expect("checked non-empty");
        if let Some(declared) = self.output_count {
            if declared != output_count {
                return Err(CoreError::invalid_parameter(
                    "output_count",
                    declared.to_string(),
                    format!("matching the last layer size ({})", output_count),
                ));
            }
        }
        self.check_override_positions(layer_sizes)?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut initer = DenseWeightInitializer::new(self.epsilon, self.zetta);

        let neuron_estimate: u32 = layer_sizes.iter().sum();
        let mut neurons: Vec<Neuron> = Vec::with_capacity(neuron_estimate as usize);
        let mut weights: Vec<f64> = Vec::new();
        let mut feature_groups: Vec<FeatureGroup> = Vec::new();
        let mut reach_past_max = 0u32;

        let mut previous_size = input_size;
        let mut previous_layer_start = 0u32;
        let mut expected_output = self.expected_input_range;

        for (layer_index, &layer_size) in layer_sizes.iter().enumerate() {
            let layer_index = layer_index as u32;
            let layer_start = neurons.len() as u32;

            initer.set_context(previous_size, expected_output);

            let mut layer_is_boltzmann_knot = false;
            if let Some(features) = self.layer_features.get(&layer_index) {
                for &feature in features {
                    if feature == FeatureKind::BoltzmannKnot {
                        layer_is_boltzmann_knot = true;
                    }
                    log::debug!(
                        "storing feature {:?} for neurons [{}..{})",
                        feature,
                        layer_start,
                        layer_start + layer_size
                    );
                    feature_groups.push(FeatureGroup {
                        kind: feature,
                        neurons: vec![IndexSynapse {
                            start: layer_start,
                            size: layer_size,
                        }],
                    });
                }
            }

            let mut output_range_sum = 0.0;
            for layer_neuron_index in 0..layer_size {
                let key = (layer_index, layer_neuron_index);

                let transfer_function = self.pick_transfer(layer_index, key, &mut rng)?;
                let input_function = InputFunction::next(
                    self.input_overrides
                        .get(&key)
                        .map(std::slice::from_ref)
                        .unwrap_or(self.allowed_input_functions.as_slice()),
                    &mut rng,
                );
                let spike_function = SpikeFunction::next(
                    self.spike_overrides
                        .get(&key)
                        .map(std::slice::from_ref)
                        .unwrap_or(self.allowed_spike_functions.as_slice()),
                    &mut rng,
                );
                output_range_sum += average_output_range(transfer_function);

                let mut input_synapses = smallvec![if layer_index == 0 {
                    InputSynapse::network_inputs(0, input_size)
                } else {
                    InputSynapse::neurons(previous_layer_start, previous_size)
                }];
                let mut input_weight_count = previous_size;

                if layer_is_boltzmann_knot {
                    input_synapses.push(InputSynapse::neurons_past(layer_start, layer_size, 1));
                    input_weight_count += layer_size;
                    reach_past_max = reach_past_max.max(1);
                }

                if let Some(past_loops) = self.recurrences.get(&key) {
                    for &reach_past in past_loops {
                        input_synapses.push(InputSynapse::neurons_past(
                            layer_start + layer_neuron_index,
                            1,
                            reach_past,
                        ));
                        input_weight_count += 1;
                        reach_past_max = reach_past_max.max(reach_past);
                    }
                }

                let weight_synapse = WeightSynapse {
                    start: weights.len() as u32,
                    size: input_weight_count + 2,
                };
                weights.push(initer.next_memory_filter(&mut rng));
                for _ in 0..input_weight_count {
                    weights.push(initer.next_weight_for(transfer_function, &mut rng));
                }
                weights.push(initer.next_bias(&mut rng));

                neurons.push(Neuron {
                    input_function,
                    transfer_function,
                    spike_function,
                    input_synapses,
                    weight_synapses: smallvec![weight_synapse],
                });
            }

            expected_output = if layer_index == 0 {
                self.expected_input_range
            } else {
                output_range_sum / layer_size as f64
            };
            previous_layer_start = layer_start;
            previous_size = layer_size;
        }

        let network = NeuronNetwork::new(
            input_size,
            reach_past_max,
            output_count,
            weights,
            neurons,
            feature_groups,
        )?;
        log::info!(
            "built dense network: {} layers, {} neurons, {} weights, memory size {}",
            layer_sizes.len(),
            network.neuron_count(),
            network.weight_count(),
            network.memory_size()
        );
        Ok(network)
    }

    fn pick_transfer(
        &self,
        layer_index: u32,
        key: (u32, u32),
        rng: &mut StdRng,
    ) -> Result<TransferFunction> {
        match (
            self.transfer_overrides.get(&key),
            self.allowed_transfer_functions
                .as_ref()
                .map(|filter| &filter[layer_index as usize]),
        ) {
            (Some(&function), Some(allowed)) => {
                if allowed.contains(&function) {
                    Ok(function)
                } else {
                    Err(CoreError::IncompatibleFunction {
                        layer_index,
                        neuron_index: key.1,
                    })
                }
            }
            (Some(&function), None) => Ok(function),
            (None, Some(allowed)) => Ok(TransferFunction::next(allowed, rng)),
            (None, None) => Ok(TransferFunction::next(&TransferFunction::ALL, rng)),
        }
    }

    fn check_override_positions(&self, layer_sizes: &[u32]) -> Result<()> {
        let offending = self
            .input_overrides
            .keys()
            .chain(self.transfer_overrides.keys())
            .chain(self.spike_overrides.keys())
            .chain(self.recurrences.keys())
            .copied()
            .find(|&(layer, neuron)| {
                layer as usize >= layer_sizes.len() || neuron >= layer_sizes[layer as usize]
            });
        if let Some((layer, neuron)) = offending {
            return Err(CoreError::invalid_parameter(
                "neuron override position",
                format!("layer {} neuron {}", layer, neuron),
                "within the declared layer sizes",
            ));
        }
        if let Some(&layer) = self
            .layer_features
            .keys()
            .find(|&&layer| layer as usize >= layer_sizes.len())
        {
            return Err(CoreError::invalid_parameter(
                "feature layer index",
                layer.to_string(),
                format!("below the layer count ({})", layer_sizes.len()),
            ));
        }
        Ok(())
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Expected average output amplitude of a transfer function, used to scale
/// the next layer's weight initialisation
fn average_output_range(function: TransferFunction) -> f64 {
    match function {
        TransferFunction::Sigmoid | TransferFunction::Tanh => 1.0,
        _ => 50.0,
    }
}
