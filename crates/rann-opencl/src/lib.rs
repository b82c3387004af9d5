//! OpenCL kernel emission for the RANN training framework
//!
//! Produces a single compute-kernel source string implementing the same
//! forward+backward sweep the CPU optimiser runs, laid out as switch-case
//! worker dispatch inside synchronised waves. Buffer management and kernel
//! compilation belong to the caller; this crate only emits source and the
//! matching buffer geometry.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod library;
mod operations;
pub mod strategy;

pub use error::{EmitterError, Result};
pub use operations::KernelArrays;
pub use strategy::{GpuTrainingStrategy, KernelBufferShapes};
