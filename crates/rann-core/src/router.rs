//! Topological-subset generator over the network descriptor
//!
//! The router walks the network and hands back independent groups of neuron
//! indices whose dependencies are either external inputs or already emitted
//! neurons. The first layers only take in input data, so they are ready
//! immediately; every other neuron builds on top of them, and with each
//! collection a further subset becomes available. In strict mode reserved
//! neurons do not count as finished, so every member of a subset is mutually
//! independent. Non-strict mode also admits neurons whose inputs are merely
//! reserved earlier in the same subset, which makes the subset order
//! significant for the consumer.

use std::collections::VecDeque;

use crate::error::{CoreError, Result};
use crate::network::NeuronNetwork;
use crate::synapse::InputRef;

/// Processing state of one neuron during routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NeuronState {
    /// Not yet considered or waiting for its inputs
    InProgress,
    /// Collected into the current subset, not yet confirmed
    Reserved,
    /// Confirmed processed by the consumer
    Processed,
}

/// Countdown of unprocessed neurons per tracked feature group
#[derive(Debug, Clone)]
struct FeatureGroupCache {
    group_index: u32,
    remaining: u32,
}

/// Iterates through a [`NeuronNetwork`], collecting solvable subsets
#[derive(Debug)]
pub struct NeuronRouter<'net> {
    network: &'net NeuronNetwork,
    states: Vec<NeuronState>,
    tracked_features: Vec<FeatureGroupCache>,
    features_of_neuron: Vec<Vec<u32>>,
    subset: VecDeque<u32>,
    subset_bytes: usize,
    processed_count: usize,
}

impl<'net> NeuronRouter<'net> {
    /// Create a router over the given network
    pub fn new(network: &'net NeuronNetwork) -> Self {
        let neuron_count = network.neuron_count();
        let mut features_of_neuron = vec![Vec::new(); neuron_count];
        let mut tracked_features = Vec::new();
        for (group_index, group) in network.feature_groups().iter().enumerate() {
            let mut remaining = 0;
            for neuron_index in group.iter_neurons() {
                features_of_neuron[neuron_index as usize].push(tracked_features.len() as u32);
                remaining += 1;
            }
            tracked_features.push(FeatureGroupCache {
                group_index: group_index as u32,
                remaining,
            });
        }
        Self {
            network,
            states: vec![NeuronState::InProgress; neuron_count],
            tracked_features,
            features_of_neuron,
            subset: VecDeque::new(),
            subset_bytes: 0,
            processed_count: 0,
        }
    }

    /// Collect neurons into a solvable subset of the network
    ///
    /// `strict` forbids intra-subset dependencies; `budget_mb` bounds the
    /// estimated memory footprint of the collected subset. `max_threads`
    /// only guides the candidate scan granularity, the subset may grow
    /// beyond it.
    pub fn collect_subset(&mut self, max_threads: u16, budget_mb: f64, strict: bool) {
        let budget_bytes = (budget_mb * 1024.0 * 1024.0) as usize;
        let _ = max_threads;
        loop {
            let mut reserved_this_pass = 0;
            for neuron_index in 0..self.network.neuron_count() as u32 {
                if self.states[neuron_index as usize] != NeuronState::InProgress {
                    continue;
                }
                if self.subset_bytes >= budget_bytes {
                    log::debug!(
                        "router stops collecting: {} bytes exceed the budget",
                        self.subset_bytes
                    );
                    return;
                }
                if self.is_subset_candidate(neuron_index, strict) {
                    self.states[neuron_index as usize] = NeuronState::Reserved;
                    self.subset.push_back(neuron_index);
                    self.subset_bytes += self.estimate_neuron_bytes(neuron_index);
                    reserved_this_pass += 1;
                }
            }
            // strict collection may enable further candidates only after a
            // confirmation round, so a single pass suffices there
            if reserved_this_pass == 0 || strict {
                break;
            }
        }
    }

    /// The currently collected subset of neuron indices
    pub fn subset(&self) -> &VecDeque<u32> {
        &self.subset
    }

    /// Estimated memory footprint of the collected subset in bytes
    pub fn subset_bytes(&self) -> usize {
        self.subset_bytes
    }

    /// Whether every neuron of the network has been confirmed processed
    pub fn finished(&self) -> bool {
        self.processed_count == self.network.neuron_count()
    }

    /// Confirm the first element of the subset as processed
    ///
    /// The caller passes the index it believes to be first; a mismatch is an
    /// error so the consumer always knows which neuron it is removing.
    /// Returns the indices of the feature groups whose relevant neuron set
    /// became fully processed with this neuron.
    pub fn confirm_first_subset_element_processed(
        &mut self,
        neuron_index: u32,
    ) -> Result<Vec<u32>> {
        match self.subset.front() {
            Some(&front) if front == neuron_index => {}
            other => {
                return Err(CoreError::invalid_parameter(
                    "neuron_index",
                    neuron_index.to_string(),
                    format!("the first subset element ({:?})", other),
                ))
            }
        }
        self.subset.pop_front();
        self.states[neuron_index as usize] = NeuronState::Processed;
        self.processed_count += 1;

        let mut solved_groups = Vec::new();
        for &cache_index in &self.features_of_neuron[neuron_index as usize] {
            let cache = &mut self.tracked_features[cache_index as usize];
            debug_assert!(cache.remaining > 0);
            cache.remaining -= 1;
            if cache.remaining == 0 {
                solved_groups.push(cache.group_index);
            }
        }
        Ok(solved_groups)
    }

    /// Remove the first element of the subset without marking it processed
    pub fn omit_first_subset_element(&mut self, neuron_index: u32) -> bool {
        match self.subset.front() {
            Some(&front) if front == neuron_index => {
                self.subset.pop_front();
                self.states[neuron_index as usize] = NeuronState::InProgress;
                true
            }
            _ => false,
        }
    }

    /// Clear the subset, returning its members to the unprocessed pool
    pub fn reset_remaining_subset(&mut self) {
        while let Some(neuron_index) = self.subset.pop_front() {
            self.states[neuron_index as usize] = NeuronState::InProgress;
        }
        self.subset_bytes = 0;
    }

    /// Whether the neuron has no pending same-step dependency
    pub fn is_neuron_without_dependency(&self, neuron_index: u32) -> bool {
        self.same_step_inputs(neuron_index).all(|input| {
            matches!(
                self.states[input as usize],
                NeuronState::Processed | NeuronState::Reserved
            )
        })
    }

    /// Whether the neuron has been confirmed processed
    pub fn is_neuron_processed(&self, neuron_index: u32) -> bool {
        self.states[neuron_index as usize] == NeuronState::Processed
    }

    /// Whether the neuron is reserved in the current subset
    pub fn is_neuron_reserved(&self, neuron_index: u32) -> bool {
        self.states[neuron_index as usize] == NeuronState::Reserved
    }

    fn is_subset_candidate(&self, neuron_index: u32, strict: bool) -> bool {
        self.same_step_inputs(neuron_index).all(|input| {
            match self.states[input as usize] {
                NeuronState::Processed => true,
                // non-strict mode accepts inputs reserved earlier in this
                // same subset; the subset order carries the constraint
                NeuronState::Reserved => !strict,
                NeuronState::InProgress => false,
            }
        })
    }

    /// Same-step internal inputs of a neuron; network inputs and past
    /// reaching connections never block routing
    fn same_step_inputs(&self, neuron_index: u32) -> impl Iterator<Item = u32> + '_ {
        self.network
            .neuron(neuron_index)
            .iter_input_refs()
            .filter_map(|(input, reach_past)| match input {
                InputRef::Neuron(other) if reach_past == 0 => Some(other),
                _ => None,
            })
    }

    fn estimate_neuron_bytes(&self, neuron_index: u32) -> usize {
        let neuron = self.network.neuron(neuron_index);
        let value_slots = (neuron.weight_count() + neuron.input_count() + 1) as usize
            * std::mem::size_of::<f64>();
        let synapse_slots = (neuron.input_synapses.len() * 3 + neuron.weight_synapses.len() * 2)
            * std::mem::size_of::<u32>();
        value_slots + synapse_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NetworkBuilder;

    fn network(layers: &[u32]) -> NeuronNetwork {
        NetworkBuilder::new()
            .input_size(2)
            .seed(99)
            .dense_layers(layers)
            .unwrap()
    }

    #[test]
    fn test_strict_collection_walks_layers() {
        let net = network(&[3, 2, 1]);
        let mut router = NeuronRouter::new(&net);

        router.collect_subset(4, 2048.0, true);
        let first: Vec<u32> = router.subset().iter().copied().collect();
        assert_eq!(first, vec![0, 1, 2]);

        for index in first {
            router.confirm_first_subset_element_processed(index).unwrap();
        }
        assert!(!router.finished());

        router.collect_subset(4, 2048.0, true);
        let second: Vec<u32> = router.subset().iter().copied().collect();
        assert_eq!(second, vec![3, 4]);
        for index in second {
            router.confirm_first_subset_element_processed(index).unwrap();
        }

        router.collect_subset(4, 2048.0, true);
        let third: Vec<u32> = router.subset().iter().copied().collect();
        assert_eq!(third, vec![5]);
        router.confirm_first_subset_element_processed(5).unwrap();
        assert!(router.finished());
    }

    #[test]
    fn test_non_strict_collects_everything_in_order() {
        let net = network(&[3, 2, 1]);
        let mut router = NeuronRouter::new(&net);
        router.collect_subset(4, 2048.0, false);
        let collected: Vec<u32> = router.subset().iter().copied().collect();
        assert_eq!(collected, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_confirmation_requires_front_element() {
        let net = network(&[2, 1]);
        let mut router = NeuronRouter::new(&net);
        router.collect_subset(4, 2048.0, true);
        assert!(router.confirm_first_subset_element_processed(1).is_err());
        router.confirm_first_subset_element_processed(0).unwrap();
    }

    #[test]
    fn test_omit_returns_neuron_to_pool() {
        let net = network(&[2, 1]);
        let mut router = NeuronRouter::new(&net);
        router.collect_subset(4, 2048.0, true);
        assert!(router.omit_first_subset_element(0));
        assert!(!router.is_neuron_processed(0));
        assert!(!router.is_neuron_reserved(0));
    }

    #[test]
    fn test_feature_group_completion_reported() {
        let net = NetworkBuilder::new()
            .input_size(2)
            .seed(7)
            .add_feature_to_layer(0, crate::network::FeatureKind::Softmax)
            .dense_layers(&[2, 1])
            .unwrap();
        let mut router = NeuronRouter::new(&net);
        router.collect_subset(4, 2048.0, true);

        let solved = router.confirm_first_subset_element_processed(0).unwrap();
        assert!(solved.is_empty());
        let solved = router.confirm_first_subset_element_processed(1).unwrap();
        assert_eq!(solved, vec![0]);
    }

    #[test]
    fn test_past_reaching_inputs_do_not_block() {
        let net = NetworkBuilder::new()
            .input_size(2)
            .seed(7)
            .add_feature_to_layer(1, crate::network::FeatureKind::BoltzmannKnot)
            .dense_layers(&[2, 2, 1])
            .unwrap();
        let mut router = NeuronRouter::new(&net);
        // the hidden layer depends on itself only through the past, so a
        // strict collection after the first layer must pick up both neurons
        router.collect_subset(4, 2048.0, true);
        let first: Vec<u32> = router.subset().iter().copied().collect();
        assert_eq!(first, vec![0, 1]);
        for index in first {
            router.confirm_first_subset_element_processed(index).unwrap();
        }
        router.collect_subset(4, 2048.0, true);
        let second: Vec<u32> = router.subset().iter().copied().collect();
        assert_eq!(second, vec![2, 3]);
    }
}
