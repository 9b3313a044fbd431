//! Coupling Layer implementation
//!
//! This module implements the piecewise rational-quadratic coupling transform:
//! features marked as identity by the mask pass through unchanged and feed a
//! conditioner network whose output parameterizes a spline for every
//! remaining feature.

use ndarray::{Array1, Array2, Axis};
use std::fmt;

use super::spline::{RationalQuadraticSpline, Tails};
use super::transform::Transform;
use crate::error::{Error, Result};
use crate::network::DenseNet;

/// Network mapping identity features (and an optional context) to spline parameters
pub trait ConditionerNet: fmt::Debug + Send + Sync {
    fn forward(&self, x: &Array2<f64>, context: Option<&Array2<f64>>) -> Result<Array2<f64>>;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;
}

impl ConditionerNet for DenseNet {
    fn forward(&self, x: &Array2<f64>, context: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        DenseNet::forward(self, x, context)
    }

    fn input_dim(&self) -> usize {
        DenseNet::input_dim(self)
    }

    fn output_dim(&self) -> usize {
        DenseNet::output_dim(self)
    }
}

/// Builds a conditioner network for `(in_features, out_features)`
pub trait NetFactory {
    fn create(&self, in_features: usize, out_features: usize) -> Result<Box<dyn ConditionerNet>>;
}

impl<F> NetFactory for F
where
    F: Fn(usize, usize) -> Result<Box<dyn ConditionerNet>>,
{
    fn create(&self, in_features: usize, out_features: usize) -> Result<Box<dyn ConditionerNet>> {
        self(in_features, out_features)
    }
}

/// Coupling transform with rational-quadratic spline element-wise bijections
#[derive(Debug)]
pub struct PiecewiseRationalQuadraticCoupling {
    /// Total number of features
    features: usize,
    /// Features copied through unchanged (mask entry 0)
    identity_features: Vec<usize>,
    /// Features transformed by the spline (mask entry > 0)
    transform_features: Vec<usize>,
    /// Conditioner network
    transform_net: Box<dyn ConditionerNet>,
    /// Spline transformation
    spline: RationalQuadraticSpline,
}

impl PiecewiseRationalQuadraticCoupling {
    /// Create a new coupling transform
    ///
    /// The conditioner is created as
    /// `net_create_fn(num_identity, num_transform * params_per_dim)`.
    pub fn new(
        mask: &[u8],
        net_create_fn: &dyn NetFactory,
        tail_bound: f64,
        num_bins: usize,
        tails: Tails,
    ) -> Result<Self> {
        if mask.is_empty() {
            return Err(Error::InvalidMask("mask must not be empty".to_string()));
        }

        let (transform_features, identity_features): (Vec<usize>, Vec<usize>) =
            (0..mask.len()).partition(|&i| mask[i] > 0);
        if transform_features.is_empty() {
            return Err(Error::InvalidMask(format!(
                "mask {:?} selects no features to transform",
                mask
            )));
        }

        let spline = RationalQuadraticSpline::new(num_bins, tails, tail_bound)?;
        let out_features = transform_features.len() * spline.params_per_dim();
        let transform_net = net_create_fn.create(identity_features.len(), out_features)?;

        if transform_net.input_dim() != identity_features.len() {
            return Err(Error::ShapeMismatch {
                context: "conditioner input",
                expected: identity_features.len(),
                actual: transform_net.input_dim(),
            });
        }
        if transform_net.output_dim() != out_features {
            return Err(Error::ShapeMismatch {
                context: "conditioner output",
                expected: out_features,
                actual: transform_net.output_dim(),
            });
        }

        Ok(Self {
            features: mask.len(),
            identity_features,
            transform_features,
            transform_net,
            spline,
        })
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn identity_features(&self) -> &[usize] {
        &self.identity_features
    }

    pub fn transform_features(&self) -> &[usize] {
        &self.transform_features
    }

    pub fn spline(&self) -> &RationalQuadraticSpline {
        &self.spline
    }

    pub fn transform_net(&self) -> &dyn ConditionerNet {
        self.transform_net.as_ref()
    }

    fn couple(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
        inverse: bool,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        if inputs.ncols() != self.features {
            return Err(Error::ShapeMismatch {
                context: "coupling input",
                expected: self.features,
                actual: inputs.ncols(),
            });
        }

        // Identity features are the same on both sides, so the parameters are too
        let identity = if self.identity_features.is_empty() {
            Array2::zeros((inputs.nrows(), 0))
        } else {
            inputs.select(Axis(1), &self.identity_features)
        };
        let params = self.transform_net.forward(&identity, context)?;

        let per_dim = self.spline.params_per_dim();
        let expected = self.transform_features.len() * per_dim;
        if params.nrows() != inputs.nrows() {
            return Err(Error::ShapeMismatch {
                context: "conditioner output rows",
                expected: inputs.nrows(),
                actual: params.nrows(),
            });
        }
        if params.ncols() != expected {
            return Err(Error::ShapeMismatch {
                context: "conditioner output width",
                expected,
                actual: params.ncols(),
            });
        }
        let mut outputs = inputs.clone();
        let mut log_det = Array1::zeros(inputs.nrows());

        for (row, params_row) in params.outer_iter().enumerate() {
            let params_row = params_row.to_vec();
            for (j, &feature) in self.transform_features.iter().enumerate() {
                let raw = &params_row[j * per_dim..(j + 1) * per_dim];
                let value = inputs[[row, feature]];
                let (y, ld) = if inverse {
                    self.spline.inverse(value, raw)?
                } else {
                    self.spline.forward(value, raw)?
                };
                outputs[[row, feature]] = y;
                log_det[row] += ld;
            }
        }

        Ok((outputs, log_det))
    }
}

impl Transform for PiecewiseRationalQuadraticCoupling {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        self.couple(inputs, context, false)
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        self.couple(inputs, context, true)
    }

    fn name(&self) -> &'static str {
        "PiecewiseRationalQuadraticCoupling"
    }
}
