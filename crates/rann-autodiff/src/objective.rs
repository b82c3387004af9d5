//! Objective: a cost function applied over network outputs and labels

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cost::CostFunction;

/// Cost function bound to the training target, providing per-sample and
/// batched error computation plus the derivative dispatch the objective
/// operations rely on
#[derive(Debug, Clone)]
pub struct Objective {
    cost: CostFunction,
}

impl Objective {
    /// Create an objective over the given cost function
    pub fn new(cost: CostFunction) -> Self {
        Self { cost }
    }

    /// The wrapped cost function
    pub fn cost(&self) -> CostFunction {
        self.cost
    }

    /// Error of one label/prediction pair, aggregated for `sample_count`
    /// overall samples
    pub fn sample_error(&self, label: &[f64], prediction: &[f64], sample_count: usize) -> f64 {
        debug_assert_eq!(label.len(), prediction.len());
        let sum: f64 = label
            .iter()
            .zip(prediction.iter())
            .map(|(&l, &p)| self.cost.cell_error(l, p))
            .sum();
        self.cost.post_process(sum, sample_count)
    }

    /// Errors of a batch of label/prediction pairs
    pub fn batch_errors(
        &self,
        labels: &[Vec<f64>],
        predictions: &[Vec<f64>],
        sample_count: usize,
    ) -> Vec<f64> {
        debug_assert_eq!(labels.len(), predictions.len());

        #[cfg(feature = "parallel")]
        {
            labels
                .par_iter()
                .zip(predictions.par_iter())
                .map(|(label, prediction)| self.sample_error(label, prediction, sample_count))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            labels
                .iter()
                .zip(predictions.iter())
                .map(|(label, prediction)| self.sample_error(label, prediction, sample_count))
                .collect()
        }
    }

    /// Derivative of the error by one weight for a single output cell
    pub fn derivative(
        &self,
        label: f64,
        prediction: f64,
        prediction_d: f64,
        sample_count: f64,
    ) -> f64 {
        self.cost
            .derivative(label, prediction, prediction_d, sample_count)
    }

    /// OpenCL-C source of the derivative for the kernel emitter
    pub fn derivative_kernel_source(
        &self,
        label: &str,
        prediction: &str,
        prediction_d: &str,
        sample_count: &str,
    ) -> String {
        self.cost
            .derivative_kernel_source(label, prediction, prediction_d, sample_count)
    }
}
