//! Function catalogue: transfer, input and spike functions
//!
//! Each family exposes a numeric `value`/`derivative` pair and the textual
//! OpenCL-C expression forms the kernel emitter splices into the generated
//! training kernel.

mod input;
mod spike;
mod transfer;

pub use input::InputFunction;
pub use spike::SpikeFunction;
pub use transfer::TransferFunction;

use rand::Rng;

/// Pick a uniformly random element of the allowed set.
///
/// A single-element set short-circuits without consuming randomness, so
/// builders configured with explicit overrides stay reproducible.
pub(crate) fn pick<T: Copy, R: Rng>(allowed: &[T], fallback: T, rng: &mut R) -> T {
    match allowed.len() {
        0 => fallback,
        1 => allowed[0],
        len => allowed[rng.gen_range(0..len)],
    }
}
