//! Cost functions and the gradient source the backward pass is seeded from.

use crate::error::OperatorError;

/// Seeds the deltas of network outputs during backward propagation.
///
/// `start..end` is a range of the flat network output vector; `add` receives
/// an index local to that range.
pub trait CostGradient {
    fn range_cost_deriv(
        &self,
        start: usize,
        end: usize,
        add: &mut dyn FnMut(usize, f64),
    ) -> Result<(), OperatorError>;
}

impl<F> CostGradient for F
where
    F: Fn(usize, usize, &mut dyn FnMut(usize, f64)) -> Result<(), OperatorError>,
{
    fn range_cost_deriv(
        &self,
        start: usize,
        end: usize,
        add: &mut dyn FnMut(usize, f64),
    ) -> Result<(), OperatorError> {
        self(start, end, add)
    }
}

pub trait CostFunction: Send + Sync {
    fn cost(&self, outputs: &[f64], targets: &[f64]) -> f64;

    /// d cost / d outputs[index]
    fn deriv(&self, outputs: &[f64], targets: &[f64], index: usize) -> f64;

    /// every output lands on the right side of 0.5 from its target
    fn is_correct(&self, outputs: &[f64], targets: &[f64]) -> bool {
        outputs.len() == targets.len()
            && outputs.iter().zip(targets).all(|(o, t)| (o - t).abs() < 0.5)
    }
}

/// 0.5 * sum (o - t)^2
#[derive(Clone, Copy, Debug, Default)]
pub struct SquaredError;

impl CostFunction for SquaredError {
    fn cost(&self, outputs: &[f64], targets: &[f64]) -> f64 {
        0.5 * outputs
            .iter()
            .zip(targets)
            .map(|(o, t)| (o - t).powi(2))
            .sum::<f64>()
    }

    fn deriv(&self, outputs: &[f64], targets: &[f64], index: usize) -> f64 {
        outputs[index] - targets[index]
    }
}

/// Binary cross entropy, for outputs in (0, 1).
#[derive(Clone, Copy, Debug, Default)]
pub struct CrossEntropy;

impl CrossEntropy {
    const EPS: f64 = 1e-12;

    fn clamp(o: f64) -> f64 {
        o.clamp(Self::EPS, 1.0 - Self::EPS)
    }
}

impl CostFunction for CrossEntropy {
    fn cost(&self, outputs: &[f64], targets: &[f64]) -> f64 {
        outputs
            .iter()
            .zip(targets)
            .map(|(o, t)| {
                let o = Self::clamp(*o);
                -(t * o.ln() + (1.0 - t) * (1.0 - o).ln())
            })
            .sum()
    }

    fn deriv(&self, outputs: &[f64], targets: &[f64], index: usize) -> f64 {
        let o = Self::clamp(outputs[index]);
        let t = targets[index];
        (o - t) / (o * (1.0 - o))
    }
}

/// The gradient of `cost` at a fixed pair of outputs and targets.
pub struct TargetGradient<'a> {
    cost: &'a dyn CostFunction,
    outputs: &'a [f64],
    targets: &'a [f64],
}

impl<'a> TargetGradient<'a> {
    pub fn new(cost: &'a dyn CostFunction, outputs: &'a [f64], targets: &'a [f64]) -> Self {
        Self { cost, outputs, targets }
    }
}

impl CostGradient for TargetGradient<'_> {
    fn range_cost_deriv(
        &self,
        start: usize,
        end: usize,
        add: &mut dyn FnMut(usize, f64),
    ) -> Result<(), OperatorError> {
        let len = self.targets.len().min(self.outputs.len());
        if start > end || end > len {
            return Err(OperatorError::Shape { expected: len, got: end });
        }
        for i in start..end {
            add(i - start, self.cost.deriv(self.outputs, self.targets, i));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::check_pullback;

    fn check_deriv(cost: &dyn CostFunction, outputs: Vec<f64>, targets: Vec<f64>) {
        check_pullback(
            &outputs,
            |o| vec![cost.cost(o, &targets)],
            |g| (0..outputs.len()).map(|i| g[0] * cost.deriv(&outputs, &targets, i)).collect(),
        )
        .unwrap();
    }

    #[test]
    fn derivatives() {
        check_deriv(&SquaredError, vec![0.2, 0.9, -0.3], vec![0.0, 1.0, 1.0]);
        check_deriv(&CrossEntropy, vec![0.2, 0.9, 0.6], vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn target_gradient_uses_local_indices() {
        let outputs = [0.5, 0.25, 1.0];
        let targets = [0.0, 1.0, 1.0];
        let grad = TargetGradient::new(&SquaredError, &outputs, &targets);
        let mut got = vec![0.0; 2];
        grad.range_cost_deriv(1, 3, &mut |i: usize, v: f64| got[i] += v).unwrap();
        assert_eq!(got, vec![-0.75, 0.0]);
        assert!(grad.range_cost_deriv(2, 4, &mut |_: usize, _: f64| {}).is_err());
    }

    #[test]
    fn correctness_threshold() {
        assert!(SquaredError.is_correct(&[0.1, 0.8], &[0.0, 1.0]));
        assert!(!SquaredError.is_correct(&[0.6], &[0.0]));
        assert!(!SquaredError.is_correct(&[0.1], &[0.0, 1.0]));
    }
}
