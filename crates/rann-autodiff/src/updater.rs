//! Weight update rules applied between training iterations
//!
//! The optimiser hands the averaged gradient to one of these rules; the
//! rule owns whatever running state it needs (velocity, moment estimates)
//! sized to the weight table. The hyperparameters come from the settings
//! surface: `beta` drives the momentum decay, `beta_2` and `epsilon` the
//! second-moment estimate.

use rann_core::TrainingSettings;

/// Update rule turning an averaged gradient into a weight delta
#[derive(Debug, Clone)]
pub enum WeightUpdater {
    /// Plain gradient step: `w -= rate * gradient`
    Default,
    /// Momentum: a decaying velocity accumulates the gradients
    Momentum {
        /// Velocity decay factor
        beta: f64,
        /// Running velocity per weight
        velocity: Vec<f64>,
    },
    /// Adam: bias-corrected first and second moment estimates
    Adam {
        /// First-moment decay factor
        beta: f64,
        /// Second-moment decay factor
        beta_2: f64,
        /// Divisor guard, almost greater than zero
        epsilon: f64,
        /// Running first moment per weight
        moment: Vec<f64>,
        /// Running second moment per weight
        second_moment: Vec<f64>,
        /// Number of applied updates, for bias correction
        step: u32,
    },
}

impl WeightUpdater {
    /// The plain gradient step
    pub fn default_rule() -> Self {
        WeightUpdater::Default
    }

    /// Momentum rule configured from the settings
    pub fn momentum(settings: &TrainingSettings, weight_count: usize) -> Self {
        WeightUpdater::Momentum {
            beta: settings.beta,
            velocity: vec![0.0; weight_count],
        }
    }

    /// Adam rule configured from the settings
    pub fn adam(settings: &TrainingSettings, weight_count: usize) -> Self {
        WeightUpdater::Adam {
            beta: settings.beta,
            beta_2: settings.beta_2,
            epsilon: settings.epsilon,
            moment: vec![0.0; weight_count],
            second_moment: vec![0.0; weight_count],
            step: 0,
        }
    }

    /// Apply one update over the whole weight table
    pub fn apply(&mut self, weights: &mut [f64], gradients: &[f64], learning_rate: f64) {
        debug_assert_eq!(weights.len(), gradients.len());
        match self {
            WeightUpdater::Default => {
                for (weight, &gradient) in weights.iter_mut().zip(gradients.iter()) {
                    *weight -= learning_rate * gradient;
                }
            }
            WeightUpdater::Momentum { beta, velocity } => {
                for ((weight, &gradient), velocity) in weights
                    .iter_mut()
                    .zip(gradients.iter())
                    .zip(velocity.iter_mut())
                {
                    *velocity = (*beta * *velocity) + gradient;
                    *weight -= learning_rate * *velocity;
                }
            }
            WeightUpdater::Adam {
                beta,
                beta_2,
                epsilon,
                moment,
                second_moment,
                step,
            } => {
                *step += 1;
                let moment_correction = 1.0 - beta.powi(*step as i32);
                let second_correction = 1.0 - beta_2.powi(*step as i32);
                for (((weight, &gradient), moment), second_moment) in weights
                    .iter_mut()
                    .zip(gradients.iter())
                    .zip(moment.iter_mut())
                    .zip(second_moment.iter_mut())
                {
                    *moment = (*beta * *moment) + ((1.0 - *beta) * gradient);
                    *second_moment =
                        (*beta_2 * *second_moment) + ((1.0 - *beta_2) * gradient * gradient);
                    let corrected_moment = *moment / moment_correction;
                    let corrected_second = *second_moment / second_correction;
                    *weight -=
                        learning_rate * corrected_moment / (corrected_second.sqrt() + *epsilon);
                }
            }
        }
    }
}
