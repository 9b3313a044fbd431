//! Linear and normalization layers

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::config;
use crate::error::{Error, Result};

/// Fully connected layer computing `x W^T + b`
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weights, shaped (output_dim, input_dim)
    pub weights: Array2<f64>,
    /// Bias, length output_dim
    pub bias: Array1<f64>,
}

impl Linear {
    /// Create a new linear layer with uniform fan-in initialization
    ///
    /// Weights and bias are drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        let bound = if input_dim > 0 {
            1.0 / (input_dim as f64).sqrt()
        } else {
            0.0
        };

        if bound == 0.0 {
            return Self {
                weights: Array2::zeros((output_dim, input_dim)),
                bias: Array1::zeros(output_dim),
            };
        }

        let uniform = Uniform::new_inclusive(-bound, bound);
        let weights = Array2::from_shape_fn((output_dim, input_dim), |_| uniform.sample(rng));
        let bias = Array1::from_shape_fn(output_dim, |_| uniform.sample(rng));

        Self { weights, bias }
    }

    /// Create a layer from explicit parameters
    pub fn from_parts(weights: Array2<f64>, bias: Array1<f64>) -> Result<Self> {
        if weights.nrows() != bias.len() {
            return Err(Error::ShapeMismatch {
                context: "linear bias",
                expected: weights.nrows(),
                actual: bias.len(),
            });
        }
        Ok(Self { weights, bias })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn num_parameters(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    /// Forward pass over a batch of rows
    pub fn forward(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.input_dim() {
            return Err(Error::ShapeMismatch {
                context: "linear input",
                expected: self.input_dim(),
                actual: x.ncols(),
            });
        }
        Ok(x.dot(&self.weights.t()) + &self.bias)
    }
}

/// Layer normalization over the feature axis
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub gamma: Array1<f64>,
    pub beta: Array1<f64>,
    eps: f64,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps: config::NORM_EPS,
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    /// Normalize each row to zero mean and unit variance, then scale and shift
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            let n = row.len() as f64;
            let mean = row.sum() / n;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = (var + self.eps).sqrt();
            row.mapv_inplace(|v| (v - mean) / std);
        }
        out * &self.gamma + &self.beta
    }
}

/// Batch normalization over the batch axis
#[derive(Debug, Clone)]
pub struct BatchNorm {
    pub gamma: Array1<f64>,
    pub beta: Array1<f64>,
    pub running_mean: Array1<f64>,
    pub running_var: Array1<f64>,
    momentum: f64,
    eps: f64,
}

impl BatchNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            running_mean: Array1::zeros(dim),
            running_var: Array1::ones(dim),
            momentum: config::BATCH_NORM_MOMENTUM,
            eps: config::NORM_EPS,
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    /// Normalize with batch statistics in training mode, running statistics otherwise
    ///
    /// A single-row batch has no variance, so it always uses the running statistics.
    pub fn forward(&self, x: &Array2<f64>, training: bool) -> Array2<f64> {
        let (mean, var) = match batch_stats(x) {
            Some((mean, var, _)) if training => (mean, var),
            _ => (self.running_mean.clone(), self.running_var.clone()),
        };
        let std = var.mapv(|v| (v + self.eps).sqrt());
        (x - &mean) / &std * &self.gamma + &self.beta
    }

    /// Fold the statistics of a batch into the running statistics
    pub fn update_running_stats(&mut self, x: &Array2<f64>) {
        if let Some((mean, _, unbiased_var)) = batch_stats(x) {
            let m = self.momentum;
            self.running_mean = &self.running_mean * (1.0 - m) + &(mean * m);
            self.running_var = &self.running_var * (1.0 - m) + &(unbiased_var * m);
        }
    }
}

/// Per-column mean, biased variance and unbiased variance; `None` below two rows
fn batch_stats(x: &Array2<f64>) -> Option<(Array1<f64>, Array1<f64>, Array1<f64>)> {
    if x.nrows() < 2 {
        return None;
    }
    let mean = x.mean_axis(Axis(0))?;
    let var = x.var_axis(Axis(0), 0.0);
    let unbiased = x.var_axis(Axis(0), 1.0);
    Some((mean, var, unbiased))
}
