//! Spike function catalogue
//!
//! A spike function blends the freshly computed transfer value of a neuron
//! with the value the same neuron produced in the previous time step, steered
//! by the neuron's first weight (the spike parameter). Differentiating by the
//! spike parameter itself requires a different expression than differentiating
//! by any other weight, so both forms are exposed.

use rand::Rng;

/// State-blending function applied as the last stage of a neuron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpikeFunction {
    /// Pass the new value through, ignoring the previous state
    None,
    /// Blend: p * previous + (1 - p) * new
    Memory,
    /// Parametric step from the previous state: previous + p * (new - previous)
    Parametric,
    /// Amplify the new value: p * new
    Amplify,
}

impl SpikeFunction {
    /// Every member of the catalogue
    pub const ALL: [SpikeFunction; 4] = [
        SpikeFunction::None,
        SpikeFunction::Memory,
        SpikeFunction::Parametric,
        SpikeFunction::Amplify,
    ];

    /// Provide a random spike function from the given range
    pub fn next<R: Rng>(allowed: &[SpikeFunction], rng: &mut R) -> SpikeFunction {
        super::pick(allowed, SpikeFunction::Memory, rng)
    }

    /// Apply the spike function to a neuron's activation data
    pub fn value(self, parameter: f64, new_data: f64, previous_data: f64) -> f64 {
        match self {
            SpikeFunction::None => new_data,
            SpikeFunction::Memory => {
                (previous_data * parameter) + (new_data * (1.0 - parameter))
            }
            SpikeFunction::Parametric => previous_data + parameter * (new_data - previous_data),
            SpikeFunction::Amplify => parameter * new_data,
        }
    }

    /// Derivative in case the differentiated weight is the spike parameter
    pub fn derivative_for_parameter(
        self,
        parameter: f64,
        previous_data: f64,
        previous_data_d: f64,
        new_data: f64,
        new_data_d: f64,
    ) -> f64 {
        match self {
            SpikeFunction::None => new_data_d,
            SpikeFunction::Memory => {
                previous_data + (parameter * previous_data_d) - new_data
                    + ((1.0 - parameter) * new_data_d)
            }
            SpikeFunction::Parametric => {
                (new_data - previous_data)
                    + previous_data_d
                    + parameter * (new_data_d - previous_data_d)
            }
            SpikeFunction::Amplify => new_data + parameter * new_data_d,
        }
    }

    /// Derivative in case the differentiated weight is not the spike parameter
    pub fn derivative_not_for_parameter(
        self,
        parameter: f64,
        previous_data_d: f64,
        new_data_d: f64,
    ) -> f64 {
        match self {
            SpikeFunction::None => new_data_d,
            SpikeFunction::Memory => {
                (parameter * previous_data_d) + ((1.0 - parameter) * new_data_d)
            }
            SpikeFunction::Parametric => {
                previous_data_d + parameter * (new_data_d - previous_data_d)
            }
            SpikeFunction::Amplify => parameter * new_data_d,
        }
    }

    /// OpenCL-C expression computing the spike function
    pub fn kernel_expression(self, parameter: &str, previous_data: &str, new_data: &str) -> String {
        let p = format!("({})", parameter);
        let prev = format!("({})", previous_data);
        let new = format!("({})", new_data);
        match self {
            SpikeFunction::None => new,
            SpikeFunction::Memory => format!(
                "(({prev} * {p}) + ({new} * (1.0 - {p})))",
                p = p,
                prev = prev,
                new = new
            ),
            SpikeFunction::Parametric => {
                format!("({prev} + {p} * ({new} - {prev}))", p = p, prev = prev, new = new)
            }
            SpikeFunction::Amplify => format!("({p} * {new})", p = p, new = new),
        }
    }

    /// OpenCL-C expression for the derivative by the spike parameter itself
    pub fn kernel_derivative_for_parameter(
        self,
        parameter: &str,
        previous_data: &str,
        previous_data_d: &str,
        new_data: &str,
        new_data_d: &str,
    ) -> String {
        let p = format!("({})", parameter);
        let prev = format!("({})", previous_data);
        let prev_d = format!("({})", previous_data_d);
        let new = format!("({})", new_data);
        let new_d = format!("({})", new_data_d);
        match self {
            SpikeFunction::None => new_d,
            SpikeFunction::Memory => format!(
                "({prev} + ({p} * {prev_d}) - {new} + ((1.0 - {p}) * {new_d}))",
                p = p,
                prev = prev,
                prev_d = prev_d,
                new = new,
                new_d = new_d
            ),
            SpikeFunction::Parametric => format!(
                "(({new} - {prev}) + {prev_d} + {p} * ({new_d} - {prev_d}))",
                p = p,
                prev = prev,
                prev_d = prev_d,
                new = new,
                new_d = new_d
            ),
            SpikeFunction::Amplify => {
                format!("({new} + {p} * {new_d})", p = p, new = new, new_d = new_d)
            }
        }
    }

    /// OpenCL-C expression for the derivative by any other weight
    pub fn kernel_derivative_not_for_parameter(
        self,
        parameter: &str,
        previous_data_d: &str,
        new_data_d: &str,
    ) -> String {
        let p = format!("({})", parameter);
        let prev_d = format!("({})", previous_data_d);
        let new_d = format!("({})", new_data_d);
        match self {
            SpikeFunction::None => new_d,
            SpikeFunction::Memory => format!(
                "(({p} * {prev_d}) + ((1.0 - {p}) * {new_d}))",
                p = p,
                prev_d = prev_d,
                new_d = new_d
            ),
            SpikeFunction::Parametric => format!(
                "({prev_d} + {p} * ({new_d} - {prev_d}))",
                p = p,
                prev_d = prev_d,
                new_d = new_d
            ),
            SpikeFunction::Amplify => format!("({p} * {new_d})", p = p, new_d = new_d),
        }
    }
}
