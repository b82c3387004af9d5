//! Training settings surface shared by the builder, the optimiser and the kernel emitter

use crate::error::{CoreError, Result};

/// Bit-flag set selecting the conditions under which training reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainingStrategy(u32);

impl TrainingStrategy {
    /// No automatic stop condition
    pub const NONE: Self = Self(0);
    /// Stop once the training error reaches zero
    pub const STOP_IF_TRAINING_ERROR_ZERO: Self = Self(1);
    /// Stop once the training error falls below the current learning rate
    pub const STOP_IF_TRAINING_ERROR_BELOW_LEARNING_RATE: Self = Self(1 << 1);
    /// Stop once the test error worsens past the early stopping margin
    pub const EARLY_STOPPING: Self = Self(1 << 2);

    /// Check whether every flag of the argument is enabled in this set
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Enable or disable the flags of the argument
    pub fn set(&mut self, other: Self, enable: bool) {
        if enable {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl std::ops::BitOr for TrainingStrategy {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Hyperparameters and resource limits steering training
///
/// The hyperparameters `alpha..lambda` feed the activation functions and the
/// weight update formulas; the thread counts size the forward and backward
/// worker pools; `device_max_megabytes` bounds the neuron router packing.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainingSettings {
    /// Number of threads used for forward (value) parallelism
    pub max_solve_threads: u16,
    /// Number of threads used for backward (per-weight) parallelism
    pub max_processing_threads: u16,
    /// Iteration cadence for refreshing train/test errors
    pub tolerance_loop_value: u32,
    /// Memory budget for one neuron router subset (megabytes)
    pub device_max_megabytes: f64,
    /// Base learning rate before decay
    pub learning_rate: f64,
    /// Step-wise decay schedule as `(iteration_threshold, multiplier)` pairs
    pub learning_rate_decay: Vec<(u32, f64)>,
    /// Number of sequences evaluated in one training iteration
    pub minibatch_size: u32,
    /// Maximum length of the truncation window inside a sequence
    pub memory_truncation: u32,
    /// Activation parameter (ELU/SELU scale)
    pub alpha: f64,
    /// Momentum-style hyperparameter
    pub beta: f64,
    /// Secondary momentum-style hyperparameter
    pub beta_2: f64,
    /// Hyperparameter reserved for update rules
    pub gamma: f64,
    /// Early stopping margin
    pub delta: f64,
    /// Very small positive value, almost greater than 0.0
    pub epsilon: f64,
    /// Bias initialisation amplitude
    pub zetta: f64,
    /// SELU scale parameter
    pub lambda: f64,
    /// Probability of dropping a neuron output when dropout is active
    pub dropout_probability: f64,
    /// Enabled training-stop strategies
    pub training_strategy: TrainingStrategy,
    /// Optional RNG seed for reproducible runs
    pub random_seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            max_solve_threads: 4,
            max_processing_threads: 4,
            tolerance_loop_value: 100,
            device_max_megabytes: 2048.0,
            learning_rate: 1e-6,
            learning_rate_decay: Vec::new(),
            minibatch_size: 64,
            memory_truncation: 2,
            alpha: 1.6732,
            beta: 0.9,
            beta_2: 0.99,
            gamma: 0.9,
            delta: 0.03,
            epsilon: 1e-8,
            zetta: 0.3,
            lambda: 1.0507,
            dropout_probability: 0.2,
            training_strategy: TrainingStrategy::NONE,
            random_seed: None,
        }
    }
}

impl TrainingSettings {
    /// Create settings with validation of the interdependent fields
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads for the inner sub-pools, derived from the solve thread count
    pub fn sqrt_of_solve_threads(&self) -> u16 {
        ((self.max_solve_threads as f64).sqrt().max(1.0)) as u16
    }

    /// Learning rate effective at the given iteration, decay schedule applied
    pub fn learning_rate(&self, iteration: u32) -> f64 {
        let mut rate = self.learning_rate;
        for &(threshold, multiplier) in &self.learning_rate_decay {
            if iteration >= threshold {
                rate *= multiplier;
            }
        }
        rate
    }

    /// Check whether the given stop strategy is enabled
    pub fn has_training_strategy(&self, strategy: TrainingStrategy) -> bool {
        self.training_strategy.contains(strategy)
    }

    /// Set the base learning rate
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the step-wise learning rate decay schedule
    pub fn with_learning_rate_decay(mut self, decay: Vec<(u32, f64)>) -> Self {
        self.learning_rate_decay = decay;
        self
    }

    /// Set the minibatch size
    pub fn with_minibatch_size(mut self, minibatch_size: u32) -> Self {
        self.minibatch_size = minibatch_size;
        self
    }

    /// Set the maximum truncation window length
    pub fn with_memory_truncation(mut self, memory_truncation: u32) -> Self {
        self.memory_truncation = memory_truncation;
        self
    }

    /// Set forward thread count
    pub fn with_max_solve_threads(mut self, threads: u16) -> Self {
        self.max_solve_threads = threads;
        self
    }

    /// Set backward thread count
    pub fn with_max_processing_threads(mut self, threads: u16) -> Self {
        self.max_processing_threads = threads;
        self
    }

    /// Set the error refresh cadence
    pub fn with_tolerance_loop_value(mut self, value: u32) -> Self {
        self.tolerance_loop_value = value;
        self
    }

    /// Set the neuron router packing budget
    pub fn with_device_max_megabytes(mut self, megabytes: f64) -> Self {
        self.device_max_megabytes = megabytes;
        self
    }

    /// Set the dropout probability; must lie in `[0, 1]`
    pub fn with_dropout_probability(mut self, probability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(CoreError::invalid_parameter(
                "dropout_probability",
                probability.to_string(),
                "within [0, 1]",
            ));
        }
        self.dropout_probability = probability;
        Ok(self)
    }

    /// Enable or disable a training-stop strategy
    pub fn with_training_strategy(mut self, strategy: TrainingStrategy, enable: bool) -> Self {
        self.training_strategy.set(strategy, enable);
        self
    }

    /// Set the RNG seed for reproducibility
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = TrainingSettings::default();
        assert_eq!(settings.minibatch_size, 64);
        assert_eq!(settings.memory_truncation, 2);
        assert!(settings.learning_rate > 0.0);
        assert_eq!(settings.sqrt_of_solve_threads(), 2);
    }

    #[test]
    fn test_learning_rate_decay() {
        let settings = TrainingSettings::default()
            .with_learning_rate(0.1)
            .with_learning_rate_decay(vec![(100, 0.5), (200, 0.5)]);

        assert_eq!(settings.learning_rate(0), 0.1);
        assert_eq!(settings.learning_rate(99), 0.1);
        assert_eq!(settings.learning_rate(100), 0.05);
        assert_eq!(settings.learning_rate(250), 0.025);
    }

    #[test]
    fn test_dropout_bounds() {
        assert!(TrainingSettings::default()
            .with_dropout_probability(1.5)
            .is_err());
        let settings = TrainingSettings::default()
            .with_dropout_probability(0.0)
            .unwrap();
        assert_eq!(settings.dropout_probability, 0.0);
    }

    #[test]
    fn test_training_strategy_flags() {
        let settings = TrainingSettings::default()
            .with_training_strategy(TrainingStrategy::EARLY_STOPPING, true)
            .with_training_strategy(TrainingStrategy::STOP_IF_TRAINING_ERROR_ZERO, true);

        assert!(settings.has_training_strategy(TrainingStrategy::EARLY_STOPPING));
        assert!(settings.has_training_strategy(TrainingStrategy::STOP_IF_TRAINING_ERROR_ZERO));
        assert!(!settings
            .has_training_strategy(TrainingStrategy::STOP_IF_TRAINING_ERROR_BELOW_LEARNING_RATE));

        let cleared =
            settings.with_training_strategy(TrainingStrategy::EARLY_STOPPING, false);
        assert!(!cleared.has_training_strategy(TrainingStrategy::EARLY_STOPPING));
    }
}
