//! Input function catalogue

use rand::Rng;

/// Pairwise reducer collecting the weighted inputs of a neuron
///
/// Inputs are collected left-to-right; the first operand seeds the
/// accumulator rather than being combined with zero, which keeps multiply
/// from zeroing out the whole reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputFunction {
    /// a + b
    Add,
    /// a * b
    Multiply,
}

impl InputFunction {
    /// Every member of the catalogue
    pub const ALL: [InputFunction; 2] = [InputFunction::Add, InputFunction::Multiply];

    /// Provide a random input function from the given range
    pub fn next<R: Rng>(allowed: &[InputFunction], rng: &mut R) -> InputFunction {
        super::pick(allowed, InputFunction::Add, rng)
    }

    /// Merge two values through the input function
    pub fn collect(self, a: f64, b: f64) -> f64 {
        match self {
            InputFunction::Add => a + b,
            InputFunction::Multiply => a * b,
        }
    }

    /// Derivative of the reduction given both operands and their derivatives
    pub fn derivative(self, a: f64, a_dw: f64, b: f64, b_dw: f64) -> f64 {
        match self {
            InputFunction::Add => a_dw + b_dw,
            InputFunction::Multiply => (a * b_dw) + (a_dw * b),
        }
    }

    /// OpenCL-C expression merging `a` and `b`
    pub fn kernel_expression(self, a: &str, b: &str) -> String {
        match self {
            InputFunction::Add => format!("(({}) + ({}))", a, b),
            InputFunction::Multiply => format!("(({}) * ({}))", a, b),
        }
    }

    /// OpenCL-C expression for the derivative of the reduction
    pub fn kernel_derivative_expression(
        self,
        a: &str,
        a_dw: &str,
        b: &str,
        b_dw: &str,
    ) -> String {
        match self {
            InputFunction::Add => format!("(({}) + ({}))", a_dw, b_dw),
            InputFunction::Multiply => format!(
                "((({a}) * ({b_dw})) + (({a_dw}) * ({b})))",
                a = a,
                b = b,
                a_dw = a_dw,
                b_dw = b_dw
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect() {
        assert_eq!(InputFunction::Add.collect(2.0, 3.0), 5.0);
        assert_eq!(InputFunction::Multiply.collect(2.0, 3.0), 6.0);
    }

    #[test]
    fn test_derivative_product_rule() {
        // d(a*b) = a*b' + a'*b
        let d = InputFunction::Multiply.derivative(2.0, 0.5, 3.0, 0.25);
        assert_eq!(d, 2.0 * 0.25 + 0.5 * 3.0);

        let d = InputFunction::Add.derivative(2.0, 0.5, 3.0, 0.25);
        assert_eq!(d, 0.75);
    }

    #[test]
    fn test_kernel_expressions() {
        assert_eq!(
            InputFunction::Add.kernel_expression("x", "y"),
            "((x) + (y))"
        );
        assert_eq!(
            InputFunction::Multiply.kernel_derivative_expression("a", "ad", "b", "bd"),
            "(((a) * (bd)) + ((ad) * (b)))"
        );
    }
}
