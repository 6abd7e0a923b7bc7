use ndarray::prelude::*;
use ndarray_rand::RandomExt;
use rand_distr::Normal;

use super::{Activation, NodeData, Operator};
use crate::error::OperatorError;

const BIAS_VALUE: f64 = 1.0;

enum Init {
    Random,
    Given(Vec<f64>),
}

/// A fully connected layer: every value is `activation(w · inputs + b)`.
///
/// Weights are stored as `[size, input_size + 1]`, the bias in the last
/// column. Adjustments accumulate into `staged` until committed.
pub struct Neurons {
    activation: Activation,
    init: Init,
    weights: Array2<f64>,
    staged: Array2<f64>,
}

impl Neurons {
    /// weights drawn from N(0, 1/fan_in) when the graph is built, the bias
    /// column included; fan_in does not count the bias
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            init: Init::Random,
            weights: Array2::zeros((0, 0)),
            staged: Array2::zeros((0, 0)),
        }
    }

    /// `weights` is row-major `[size, input_size + 1]`, bias last
    pub fn with_weights(activation: Activation, weights: Vec<f64>) -> Self {
        Self {
            init: Init::Given(weights),
            ..Self::new(activation)
        }
    }

    fn fan_in(&self) -> usize {
        self.weights.ncols().saturating_sub(1)
    }

    /// the gradient of the cost w.r.t. the weighted sum of value `k`
    fn sum_delta(&self, data: &NodeData<'_>, k: usize) -> f64 {
        data.deltas[k] * self.activation.backward(data.values[k])
    }
}

impl Operator for Neurons {
    fn init(&mut self, input_size: usize, size: usize) -> Result<(), OperatorError> {
        let shape = (size, input_size + 1);
        self.weights = match std::mem::replace(&mut self.init, Init::Random) {
            Init::Random => {
                let std = 1.0 / (input_size.max(1) as f64).sqrt();
                let normal = Normal::new(0.0, std).map_err(|e| OperatorError::msg(e.to_string()))?;
                Array2::random(shape, normal)
            }
            Init::Given(w) => {
                let got = w.len();
                Array2::from_shape_vec(shape, w).map_err(|_| OperatorError::Shape {
                    expected: shape.0 * shape.1,
                    got,
                })?
            }
        };
        self.staged = Array2::zeros(shape);
        Ok(())
    }

    fn evaluate(&mut self, inputs: &[f64], values: &mut [f64]) -> Result<(), OperatorError> {
        if inputs.len() != self.fan_in() {
            return Err(OperatorError::Shape { expected: self.fan_in(), got: inputs.len() });
        }
        let x = ArrayView1::from(inputs);
        for (v, row) in values.iter_mut().zip(self.weights.rows()) {
            let n = row.len() - 1;
            let z = row.slice(s![..n]).dot(&x) + row[n] * BIAS_VALUE;
            *v = self.activation.forward(z);
        }
        Ok(())
    }

    fn input_deltas(
        &self,
        data: NodeData<'_>,
        start: usize,
        end: usize,
        add: &mut dyn FnMut(usize, f64),
    ) -> Result<(), OperatorError> {
        if start > end || end > self.fan_in() {
            return Err(OperatorError::Shape { expected: self.fan_in(), got: end });
        }
        for (k, row) in self.weights.rows().into_iter().enumerate() {
            let g = self.sum_delta(&data, k);
            for j in start..end {
                add(j - start, g * row[j]);
            }
        }
        Ok(())
    }

    fn can_be_adjusted(&self) -> bool {
        true
    }

    fn adjust(&mut self, data: NodeData<'_>, learning_rate: f64) -> Result<(), OperatorError> {
        if data.inputs.len() != self.fan_in() {
            return Err(OperatorError::Shape { expected: self.fan_in(), got: data.inputs.len() });
        }
        let n = self.fan_in();
        for k in 0..self.staged.nrows() {
            let g = self.sum_delta(&data, k);
            let mut row = self.staged.row_mut(k);
            row.slice_mut(s![..n])
                .zip_mut_with(&ArrayView1::from(data.inputs), |w, x| *w -= learning_rate * g * x);
            row[n] -= learning_rate * g * BIAS_VALUE;
        }
        Ok(())
    }

    fn commit_weights(&mut self) -> Result<(), OperatorError> {
        self.weights += &self.staged;
        self.staged.fill(0.0);
        Ok(())
    }

    fn parameters(&self) -> Vec<f64> {
        self.weights.iter().copied().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::check_input_deltas;

    fn layer(act: Activation) -> Neurons {
        // 2 values, 3 inputs
        let mut n = Neurons::with_weights(act, vec![0.4, -0.2, 0.7, 0.1, -0.5, 0.3, 0.9, -0.3]);
        n.init(3, 2).unwrap();
        n
    }

    #[test]
    fn given_weights_must_fit() {
        let mut n = Neurons::with_weights(Activation::Identity, vec![1.0, 2.0]);
        assert!(matches!(n.init(3, 1), Err(OperatorError::Shape { expected: 4, got: 2 })));
    }

    #[test]
    fn random_init_has_bias_column() {
        let mut n = Neurons::new(Activation::Tanh);
        n.init(5, 3).unwrap();
        assert_eq!(n.parameters().len(), 3 * 6);
    }

    #[test]
    fn evaluate_weighted_sum() {
        let mut n = layer(Activation::Identity);
        let mut values = [0.0; 2];
        n.evaluate(&[1.0, 2.0, 3.0], &mut values).unwrap();
        assert!((values[0] - (0.4 - 0.4 + 2.1 + 0.1)).abs() < 1e-12);
        assert!((values[1] - (-0.5 + 0.6 + 2.7 - 0.3)).abs() < 1e-12);
        assert!(n.evaluate(&[1.0, 2.0], &mut values).is_err());
    }

    #[test]
    fn input_deltas_match_finite_differences() {
        for act in [Activation::Logistic, Activation::Tanh, Activation::Identity] {
            // split the way two separate input nodes would be
            check_input_deltas(&mut layer(act), &[0.3, -0.8, 0.5], 2, &[0..1, 1..3])
                .unwrap_or_else(|e| panic!("{act}: {e}"));
        }
    }

    #[test]
    fn random_init_scales_with_fan_in() {
        let mut n = Neurons::new(Activation::Identity);
        n.init(4, 2000).unwrap();
        let w = n.parameters();
        let mean = w.iter().sum::<f64>() / w.len() as f64;
        let std = (w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / w.len() as f64).sqrt();
        // 1/sqrt(4); counting the bias would give 1/sqrt(5) ~ 0.447
        assert!((std - 0.5).abs() < 0.02, "{std}");
    }

    #[test]
    fn adjust_stages_until_commit() {
        let mut n = layer(Activation::Logistic);
        let before = n.parameters();
        let inputs = [0.3, -0.8, 0.5];
        let mut values = [0.0; 2];
        n.evaluate(&inputs, &mut values).unwrap();
        let data = NodeData { inputs: &inputs, values: &values, deltas: &[0.5, -0.25] };

        n.adjust(data, 0.1).unwrap();
        n.adjust(data, 0.1).unwrap();
        assert_eq!(n.parameters(), before);

        n.commit_weights().unwrap();
        let after = n.parameters();
        // first weight of value 0: w -= 2 * rate * delta * f'(y) * x
        let g = 0.5 * values[0] * (1.0 - values[0]);
        assert!((after[0] - (before[0] - 2.0 * 0.1 * g * 0.3)).abs() < 1e-12);
        // bias of value 1
        let g = -0.25 * values[1] * (1.0 - values[1]);
        assert!((after[7] - (before[7] - 2.0 * 0.1 * g)).abs() < 1e-12);

        // nothing left staged
        n.commit_weights().unwrap();
        assert_eq!(n.parameters(), after);
    }

    #[test]
    fn input_range_out_of_bounds() {
        let n = layer(Activation::Identity);
        let data = NodeData { inputs: &[0.0; 3], values: &[0.0; 2], deltas: &[1.0; 2] };
        assert!(n.input_deltas(data, 2, 4, &mut |_: usize, _: f64| {}).is_err());
    }
}
