use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Pointwise nonlinearity applied after a weighted sum. The derivative is
/// expressed in terms of the activation's output, which is all a node keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
pub enum Activation {
    Identity,
    #[default]
    Logistic,
    Tanh,
    Relu,
}

impl Activation {
    pub fn forward(&self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Logistic => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
        }
    }

    /// dy/dx at the point where the activation produced `y`
    pub fn backward(&self, y: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            Activation::Logistic => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}
