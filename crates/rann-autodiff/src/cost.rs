//! Cost function catalogue
//!
//! Each cost exposes its per-cell error, the per-sample aggregation and the
//! derivative used by the objective operations, plus the OpenCL-C source
//! forms of the same three pieces. Logarithm arguments are clamped at
//! [`LOG_CLAMP`] so classification targets of exactly zero or one stay
//! finite.

/// Lower clamp for logarithm arguments
pub const LOG_CLAMP: f64 = 1e-16;

/// Catalogue of supported cost functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostFunction {
    /// C = sum((y - y')^2) / 2
    SquaredError,
    /// C = sum((y - y')^2) / 2n
    MeanSquaredError,
    /// C = sum(y * ln(y')) / n
    CrossEntropy,
    /// C = sum(y * ln(y') + (1 - y) * ln(1 - y')) / n
    BinaryCrossEntropy,
    /// C = sum(y * ln(y' / y)) / n
    KlDivergence,
}

impl CostFunction {
    /// Error contribution of one label/prediction cell pair
    pub fn cell_error(self, label: f64, prediction: f64) -> f64 {
        match self {
            CostFunction::SquaredError | CostFunction::MeanSquaredError => {
                (label - prediction).powi(2)
            }
            CostFunction::CrossEntropy => label * prediction.max(LOG_CLAMP).ln(),
            CostFunction::BinaryCrossEntropy => {
                (label * prediction.max(LOG_CLAMP).ln())
                    + ((1.0 - label) * (1.0 - prediction).max(LOG_CLAMP).ln())
            }
            CostFunction::KlDivergence => {
                label * (prediction / label).max(LOG_CLAMP).ln()
            }
        }
    }

    /// Aggregate a summed cell error into the per-sample error
    pub fn post_process(self, error_sum: f64, sample_count: usize) -> f64 {
        match self {
            CostFunction::SquaredError => error_sum / 2.0,
            CostFunction::MeanSquaredError => error_sum / (sample_count as f64 * 2.0),
            CostFunction::CrossEntropy
            | CostFunction::BinaryCrossEntropy
            | CostFunction::KlDivergence => error_sum / sample_count as f64,
        }
    }

    /// Derivative of the aggregated error by one weight, given the
    /// prediction and its derivative by that weight
    pub fn derivative(
        self,
        label: f64,
        prediction: f64,
        prediction_d: f64,
        sample_count: f64,
    ) -> f64 {
        match self {
            CostFunction::SquaredError => -(label - prediction) * prediction_d,
            CostFunction::MeanSquaredError => {
                -sample_count * (label - prediction) * prediction_d
            }
            CostFunction::CrossEntropy => {
                -(label * prediction_d) / (sample_count * prediction.max(LOG_CLAMP))
            }
            CostFunction::BinaryCrossEntropy => {
                prediction_d
                    * ((label / prediction.max(LOG_CLAMP))
                        - ((1.0 - label) / (1.0 - prediction).max(LOG_CLAMP)))
                    / sample_count
            }
            CostFunction::KlDivergence => {
                prediction_d * ((prediction / label).max(LOG_CLAMP).ln() + 1.0)
            }
        }
    }

    /// OpenCL-C expression for the per-cell error
    pub fn operation_kernel_source(self, label: &str, prediction: &str) -> String {
        match self {
            CostFunction::SquaredError | CostFunction::MeanSquaredError => {
                format!("pow(({} - {}), 2.0)", label, prediction)
            }
            CostFunction::CrossEntropy => {
                format!("( {} * log(max({:e},{})) )", label, LOG_CLAMP, prediction)
            }
            CostFunction::BinaryCrossEntropy => format!(
                "( ({l} * log(max({c:e},{p}))) + ((1.0 - {l}) * log(max({c:e},(1.0 - {p})))) )",
                l = label,
                p = prediction,
                c = LOG_CLAMP
            ),
            CostFunction::KlDivergence => format!(
                "( {l} * log(max({c:e}, ({p} / {l}) )) )",
                l = label,
                p = prediction,
                c = LOG_CLAMP
            ),
        }
    }

    /// OpenCL-C expression aggregating the summed error
    pub fn post_process_kernel_source(self, error_sum: &str, sample_count: &str) -> String {
        match self {
            CostFunction::SquaredError => format!("(({}) / 2.0 )", error_sum),
            CostFunction::MeanSquaredError => {
                format!("(({}) / ((double)({}) * 2.0) )", error_sum, sample_count)
            }
            CostFunction::CrossEntropy
            | CostFunction::BinaryCrossEntropy
            | CostFunction::KlDivergence => {
                format!("(({}) / (double)({}) )", error_sum, sample_count)
            }
        }
    }

    /// OpenCL-C expression for the derivative
    pub fn derivative_kernel_source(
        self,
        label: &str,
        prediction: &str,
        prediction_d: &str,
        sample_count: &str,
    ) -> String {
        match self {
            CostFunction::SquaredError => {
                format!("(-({} - {}) * {})", label, prediction, prediction_d)
            }
            CostFunction::MeanSquaredError => format!(
                "(-{} * ({} - {}) * {})",
                sample_count, label, prediction, prediction_d
            ),
            CostFunction::CrossEntropy => format!(
                "(- ({l} * {d}) / ({n} * max({c:e},{p})))",
                l = label,
                p = prediction,
                d = prediction_d,
                n = sample_count,
                c = LOG_CLAMP
            ),
            CostFunction::BinaryCrossEntropy => format!(
                "(({d} * (({l} / max({c:e},{p})) - ((1.0 - {l}) / max({c:e},(1.0 - {p}))))) / (double)({n}))",
                l = label,
                p = prediction,
                d = prediction_d,
                n = sample_count,
                c = LOG_CLAMP
            ),
            CostFunction::KlDivergence => format!(
                "({d} * (log(max({c:e}, ({p} / {l}))) + 1.0))",
                l = label,
                p = prediction,
                d = prediction_d,
                c = LOG_CLAMP
            ),
        }
    }
}
