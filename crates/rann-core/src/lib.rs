//! Core value objects for the RANN training framework
//!
//! This crate holds the layered network descriptor, the transfer/input/spike
//! function catalogue, the dense network builder and the neuron router that
//! walks a descriptor into solvable subsets. Training semantics live in the
//! companion crates; everything here is immutable during a forward/backward
//! cycle except the weight table, which the optimiser mutates between
//! iterations as the single writer.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod function;
pub mod network;
pub mod records;
pub mod router;
pub mod settings;
pub mod synapse;

pub use builder::NetworkBuilder;
pub use error::{CoreError, Result};
pub use function::{InputFunction, SpikeFunction, TransferFunction};
pub use network::{FeatureGroup, FeatureKind, Neuron, NeuronNetwork};
pub use records::NetworkRecord;
pub use router::NeuronRouter;
pub use settings::{TrainingSettings, TrainingStrategy};
pub use synapse::{IndexSynapse, InputRef, InputSynapse, WeightSynapse};
