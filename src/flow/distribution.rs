//! Base densities

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal as StandardNormalDist};
use std::f64::consts::PI;

use crate::error::{Error, Result};

/// Independent standard normal over a feature shape
#[derive(Debug, Clone, PartialEq)]
pub struct StandardNormal {
    shape: Vec<usize>,
    log_z: f64,
}

impl StandardNormal {
    pub fn new(shape: Vec<usize>) -> Self {
        let features: usize = shape.iter().product();
        Self {
            shape,
            log_z: 0.5 * features as f64 * (2.0 * PI).ln(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of features per sample
    pub fn features(&self) -> usize {
        self.shape.iter().product()
    }

    /// Log density of each row
    pub fn log_prob(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        if inputs.ncols() != self.features() {
            return Err(Error::ShapeMismatch {
                context: "base density input",
                expected: self.features(),
                actual: inputs.ncols(),
            });
        }
        Ok(inputs
            .rows()
            .into_iter()
            .map(|row| -0.5 * row.mapv(|v| v * v).sum() - self.log_z)
            .collect())
    }

    /// Draw `num_samples` rows
    pub fn sample<R: Rng + ?Sized>(&self, num_samples: usize, rng: &mut R) -> Array2<f64> {
        Array2::from_shape_fn((num_samples, self.features()), |_| {
            StandardNormalDist.sample(&mut *rng)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_log_prob() {
        let base = StandardNormal::new(vec![2]);
        let lp = base.log_prob(&array![[0.0, 0.0], [1.0, -1.0]]).unwrap();
        let log_2pi = (2.0 * PI).ln();
        assert_abs_diff_eq!(lp[0], -log_2pi, epsilon = 1e-12);
        assert_abs_diff_eq!(lp[1], -1.0 - log_2pi, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_checked() {
        let base = StandardNormal::new(vec![3]);
        assert!(base.log_prob(&Array2::zeros((1, 2))).is_err());
    }

    #[test]
    fn test_sample_moments() {
        let base = StandardNormal::new(vec![2]);
        let mut rng = StdRng::seed_from_u64(0);
        let samples = base.sample(4000, &mut rng);
        assert_eq!(samples.shape(), &[4000, 2]);
        let mean = samples.mean().unwrap();
        let var = samples.mapv(|v| v * v).mean().unwrap();
        assert!(mean.abs() < 0.1);
        assert!((var - 1.0).abs() < 0.1);
    }
}
