//! Transfer function catalogue

use rand::Rng;

use crate::settings::TrainingSettings;

/// Activation applied to the collected inputs of a neuron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferFunction {
    /// f(x) = x
    Identity,
    /// f(x) = 1 / (1 + e^-x)
    Sigmoid,
    /// f(x) = tanh(x)
    Tanh,
    /// Exponential linear unit, scaled by `alpha` on the negative side
    Elu,
    /// Scaled exponential linear unit, scaled by `lambda` and `alpha`
    Selu,
    /// f(x) = max(0, x)
    Relu,
    /// f(x) = x / (1 + e^-x)
    Swish,
}

impl TransferFunction {
    /// Every member of the catalogue
    pub const ALL: [TransferFunction; 7] = [
        TransferFunction::Identity,
        TransferFunction::Sigmoid,
        TransferFunction::Tanh,
        TransferFunction::Elu,
        TransferFunction::Selu,
        TransferFunction::Relu,
        TransferFunction::Swish,
    ];

    /// Provide a random transfer function from the given range
    pub fn next<R: Rng>(allowed: &[TransferFunction], rng: &mut R) -> TransferFunction {
        super::pick(allowed, TransferFunction::Identity, rng)
    }

    /// Apply the transfer function to the collected input
    pub fn value(self, settings: &TrainingSettings, data: f64) -> f64 {
        match self {
            TransferFunction::Identity => data,
            TransferFunction::Sigmoid => 1.0 / (1.0 + (-data).exp()),
            TransferFunction::Tanh => data.tanh(),
            TransferFunction::Elu => {
                if data <= 0.0 {
                    settings.alpha * (data.exp() - 1.0)
                } else {
                    data
                }
            }
            TransferFunction::Selu => {
                if data <= 0.0 {
                    settings.lambda * settings.alpha * (data.exp() - 1.0)
                } else {
                    settings.lambda * data
                }
            }
            TransferFunction::Relu => data.max(0.0),
            TransferFunction::Swish => data / (1.0 + (-data).exp()),
        }
    }

    /// Chain-rule derivative of the transfer function, given the input value
    /// and the input's derivative by the differentiated weight
    pub fn derivative(self, settings: &TrainingSettings, input: f64, input_dw: f64) -> f64 {
        match self {
            TransferFunction::Identity => input_dw,
            TransferFunction::Sigmoid => {
                (input_dw * input.exp()) / ((-input).exp() + 1.0).powi(2)
            }
            TransferFunction::Tanh => input_dw / input.cosh().powi(2),
            TransferFunction::Elu => {
                if input <= 0.0 {
                    settings.alpha * input.exp() * input_dw
                } else {
                    input_dw
                }
            }
            TransferFunction::Selu => {
                if input <= 0.0 {
                    settings.lambda * settings.alpha * input.exp() * input_dw
                } else {
                    settings.lambda * input_dw
                }
            }
            TransferFunction::Relu => {
                if input <= 0.0 {
                    0.0
                } else {
                    input_dw
                }
            }
            TransferFunction::Swish => {
                (input.exp() * (input + input.exp() + 1.0) * input_dw)
                    / (input.exp() + 1.0).powi(2)
            }
        }
    }

    /// OpenCL-C expression computing the transfer function over `x`
    pub fn kernel_expression(self, settings: &TrainingSettings, x: &str) -> String {
        let x = format!("({})", x);
        match self {
            TransferFunction::Identity => x,
            TransferFunction::Sigmoid => format!("( 1.0/(1.0 + exp(-{})) )", x),
            TransferFunction::Tanh => format!("(tanh({}))", x),
            TransferFunction::Elu => format!(
                "( max(0.0,{x}) + ({alpha} * (exp(min(0.0, {x})) - 1.0)) )",
                x = x,
                alpha = settings.alpha
            ),
            TransferFunction::Selu => format!(
                "( {lambda} * (max(0.0, {x}) + ({alpha} * (exp(min(0.0, {x})) - 1.0))) )",
                x = x,
                alpha = settings.alpha,
                lambda = settings.lambda
            ),
            TransferFunction::Relu => format!("max(0.0,{})", x),
            TransferFunction::Swish => format!("( {x}/(1.0 + exp(-{x})) )", x = x),
        }
    }

    /// OpenCL-C expression computing the derivative of the transfer function
    pub fn kernel_derivative_expression(
        self,
        settings: &TrainingSettings,
        input: &str,
        input_dw: &str,
    ) -> String {
        let x = format!("({})", input);
        let dx = format!("({})", input_dw);
        match self {
            TransferFunction::Identity => dx,
            TransferFunction::Sigmoid => {
                format!("({dx} * exp({x}))/pow((exp(-{x}) + 1.0), 2.0)", x = x, dx = dx)
            }
            TransferFunction::Tanh => format!("{dx}/pow(cosh({x}), 2.0)", x = x, dx = dx),
            TransferFunction::Elu => format!(
                "(({x} <= 0.0)?({alpha} * exp({x}) * {dx}):({dx}))",
                x = x,
                dx = dx,
                alpha = settings.alpha
            ),
            TransferFunction::Selu => format!(
                "(({x} < 0.0)?({lambda} * {alpha} * exp({x}) * {dx}):({lambda} * {dx}))",
                x = x,
                dx = dx,
                alpha = settings.alpha,
                lambda = settings.lambda
            ),
            TransferFunction::Relu => format!("(({x} <= 0.0)?(0.0):({dx}))", x = x, dx = dx),
            TransferFunction::Swish => format!(
                "(exp({x}) * ({x} + exp({x}) + 1.0) * {dx})/pow((exp({x}) + 1.0), 2.0)",
                x = x,
                dx = dx
            ),
        }
    }
}
