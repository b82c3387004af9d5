//! Data layer of the RANN training framework
//!
//! Holds the time-axis ring buffer primitive, the sequence-oriented dataset
//! view and the backpropagation data store the autodiff engine reads and
//! writes during the forward/backward sweeps.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod error;
pub mod ring;
pub mod store;

pub use dataset::{DatasetImplementation, DatasetRecord, DatasetView};
pub use error::{DataError, Result};
pub use ring::{DataRingbuffer, RingPast, ZeroFill};
pub use store::{BackpropDataStore, ValueView, WeightColumn};
