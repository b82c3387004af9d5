//! Synapse records: contiguous index intervals referencing inputs, weights or neurons

/// Reference to one input of a neuron, decoded from a synapse element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRef {
    /// The input comes from the network input array
    Network(u32),
    /// The input comes from another neuron's output
    Neuron(u32),
}

impl InputRef {
    /// Decode the signed start encoding: negative values address the network
    /// input array, non-negative values address the neuron array.
    pub fn decode(encoded: i32) -> InputRef {
        if encoded < 0 {
            InputRef::Network((-encoded - 1) as u32)
        } else {
            InputRef::Neuron(encoded as u32)
        }
    }

    /// Encode a network input index into the signed synapse form
    pub fn encode_network_input(index: u32) -> i32 {
        -(index as i32) - 1
    }
}

/// Interval of input references with a shared temporal offset
///
/// A negative `start` addresses network inputs; consecutive elements of the
/// interval walk the encoding away from zero, so `start = -1, size = 3`
/// covers network inputs 0, 1 and 2. A non-negative `start` covers neuron
/// indices `start .. start + size`. `reach_past` counts time steps backwards;
/// zero reads the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputSynapse {
    /// Signed interval start (see the encoding above)
    pub start: i32,
    /// Number of covered indices
    pub size: u32,
    /// Number of time steps to look backwards when reading the referenced values
    pub reach_past: u32,
}

impl InputSynapse {
    /// Synapse over neuron outputs of the current time step
    pub fn neurons(start: u32, size: u32) -> Self {
        Self {
            start: start as i32,
            size,
            reach_past: 0,
        }
    }

    /// Synapse over neuron outputs of a previous time step
    pub fn neurons_past(start: u32, size: u32, reach_past: u32) -> Self {
        Self {
            start: start as i32,
            size,
            reach_past,
        }
    }

    /// Synapse over the network input array
    pub fn network_inputs(start: u32, size: u32) -> Self {
        Self {
            start: InputRef::encode_network_input(start),
            size,
            reach_past: 0,
        }
    }

    /// Decode the nth element of this interval
    pub fn nth(&self, n: u32) -> InputRef {
        debug_assert!(n < self.size);
        if self.start < 0 {
            InputRef::Network((-self.start - 1) as u32 + n)
        } else {
            InputRef::Neuron(self.start as u32 + n)
        }
    }
}

/// Interval of weight table indices owned by a neuron
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightSynapse {
    /// First owned weight index
    pub start: u32,
    /// Number of owned weights
    pub size: u32,
}

/// Interval of neuron indices, used by feature groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexSynapse {
    /// First covered neuron index
    pub start: u32,
    /// Number of covered neurons
    pub size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_network_input_encoding_roundtrip() {
        for index in 0..16u32 {
            let encoded = InputRef::encode_network_input(index);
            assert!(encoded < 0);
            assert_eq!(InputRef::decode(encoded), InputRef::Network(index));
        }
        assert_eq!(InputRef::decode(5), InputRef::Neuron(5));
    }

    proptest! {
        #[test]
        fn prop_encoding_separates_the_address_spaces(index in 0u32..(i32::MAX as u32)) {
            let encoded = InputRef::encode_network_input(index);
            prop_assert!(encoded < 0);
            prop_assert_eq!(InputRef::decode(encoded), InputRef::Network(index));
            prop_assert_eq!(
                InputRef::decode(index as i32),
                InputRef::Neuron(index)
            );
        }
    }

    #[test]
    fn test_network_synapse_walks_upward() {
        let synapse = InputSynapse::network_inputs(0, 3);
        assert_eq!(synapse.nth(0), InputRef::Network(0));
        assert_eq!(synapse.nth(1), InputRef::Network(1));
        assert_eq!(synapse.nth(2), InputRef::Network(2));
    }

    #[test]
    fn test_neuron_synapse_elements() {
        let synapse = InputSynapse::neurons_past(4, 2, 1);
        assert_eq!(synapse.nth(0), InputRef::Neuron(4));
        assert_eq!(synapse.nth(1), InputRef::Neuron(5));
        assert_eq!(synapse.reach_past, 1);
    }
}
