//! Element-wise activation functions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Activation applied element-wise after a linear layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Pass-through
    #[default]
    Identity,
    /// max(0, x)
    Relu,
    /// Leaky ReLU with the given negative slope
    LeakyRelu(f64),
    /// Exponential linear unit with the given alpha
    Elu(f64),
    /// Hyperbolic tangent
    Tanh,
    /// Logistic sigmoid
    Sigmoid,
    /// Gaussian error linear unit (tanh approximation)
    Gelu,
    /// log(1 + exp(x))
    Softplus,
    /// x * sigmoid(x)
    Silu,
}

impl Activation {
    /// Apply the activation to a single value
    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu(slope) => {
                if x >= 0.0 {
                    x
                } else {
                    slope * x
                }
            }
            Activation::Elu(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x.exp_m1()
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
            Activation::Gelu => gelu(x),
            Activation::Softplus => softplus(x),
            Activation::Silu => x * sigmoid(x),
        }
    }

    /// Whether the activation leaves its input untouched
    pub fn is_identity(&self) -> bool {
        matches!(self, Activation::Identity)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Identity => write!(f, "identity"),
            Activation::Relu => write!(f, "relu"),
            Activation::LeakyRelu(slope) => write!(f, "leaky_relu({})", slope),
            Activation::Elu(alpha) => write!(f, "elu({})", alpha),
            Activation::Tanh => write!(f, "tanh"),
            Activation::Sigmoid => write!(f, "sigmoid"),
            Activation::Gelu => write!(f, "gelu"),
            Activation::Softplus => write!(f, "softplus"),
            Activation::Silu => write!(f, "silu"),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// GELU activation function
fn gelu(x: f64) -> f64 {
    0.5 * x * (1.0 + (x * 0.7978845608 * (1.0 + 0.044715 * x * x)).tanh())
}

/// Compute softplus: log(1 + exp(x))
pub(crate) fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x
    } else if x < -20.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}
