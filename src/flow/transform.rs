//! Invertible batch transforms
//!
//! Every transform maps a batch `(batch, features)` to a batch of the same
//! shape together with the per-row log absolute Jacobian determinant.

use ndarray::{s, Array1, Array2};
use std::fmt;

use crate::error::{Error, Result};

/// Invertible transformation of a batch
pub trait Transform: fmt::Debug + Send + Sync {
    /// Map inputs to outputs, returning `(outputs, logabsdet)`
    fn forward(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)>;

    /// Map outputs back to inputs, returning `(inputs, logabsdet)`
    fn inverse(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)>;

    /// Short human-readable name
    fn name(&self) -> &'static str;
}

/// Reverses the order of the features
#[derive(Debug, Clone)]
pub struct ReversePermutation {
    features: usize,
}

impl ReversePermutation {
    pub fn new(features: usize) -> Self {
        Self { features }
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// Output column `i` is input column `features - 1 - i`
    pub fn permutation(&self) -> Vec<usize> {
        (0..self.features).rev().collect()
    }

    fn permute(&self, inputs: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
        if inputs.ncols() != self.features {
            return Err(Error::ShapeMismatch {
                context: "permutation input",
                expected: self.features,
                actual: inputs.ncols(),
            });
        }
        let outputs = inputs.slice(s![.., ..;-1]).to_owned();
        Ok((outputs, Array1::zeros(inputs.nrows())))
    }
}

impl Transform for ReversePermutation {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        _context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        self.permute(inputs)
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        _context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        // Reversal is its own inverse
        self.permute(inputs)
    }

    fn name(&self) -> &'static str {
        "ReversePermutation"
    }
}

/// Sequential composition of transforms
#[derive(Debug, Default)]
pub struct CompositeTransform {
    transforms: Vec<Box<dyn Transform>>,
}

impl CompositeTransform {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Append a transform applied after the existing ones
    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn transforms(&self) -> &[Box<dyn Transform>] {
        &self.transforms
    }

    /// Names of the component transforms in application order
    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

impl Transform for CompositeTransform {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let mut outputs = inputs.clone();
        let mut total_log_det = Array1::zeros(inputs.nrows());

        for transform in &self.transforms {
            let (next, log_det) = transform.forward(&outputs, context)?;
            outputs = next;
            total_log_det += &log_det;
        }

        Ok((outputs, total_log_det))
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let mut outputs = inputs.clone();
        let mut total_log_det = Array1::zeros(inputs.nrows());

        for transform in self.transforms.iter().rev() {
            let (next, log_det) = transform.inverse(&outputs, context)?;
            outputs = next;
            total_log_det += &log_det;
        }

        Ok((outputs, total_log_det))
    }

    fn name(&self) -> &'static str {
        "CompositeTransform"
    }
}
