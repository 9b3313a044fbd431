//! Flow model
//!
//! A flow pairs an invertible transform (data -> noise) with a base density
//! and evaluates exact log-densities through the change of variables formula:
//! `log p(x) = log p_base(f(x)) + log |det df/dx|`.

use ndarray::{Array1, Array2, Array3};
use rand::Rng;

use super::distribution::StandardNormal;
use super::transform::{CompositeTransform, Transform};
use crate::error::{Error, Result};

/// Normalizing flow: a transform to noise space plus a base density
#[derive(Debug)]
pub struct Flow {
    transform: CompositeTransform,
    distribution: StandardNormal,
}

impl Flow {
    pub fn new(transform: CompositeTransform, distribution: StandardNormal) -> Self {
        Self {
            transform,
            distribution,
        }
    }

    pub fn transform(&self) -> &CompositeTransform {
        &self.transform
    }

    pub fn distribution(&self) -> &StandardNormal {
        &self.distribution
    }

    /// Number of features per sample
    pub fn features(&self) -> usize {
        self.distribution.features()
    }

    /// Log density of each row of `inputs`
    ///
    /// A context has one row per input row, or a single row shared by all of them.
    pub fn log_prob(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<Array1<f64>> {
        let context = expand_context(context, inputs.nrows())?;
        let (noise, log_det) = self.transform.forward(inputs, context.as_ref())?;
        let log_pz = self.distribution.log_prob(&noise)?;
        Ok(log_pz + log_det)
    }

    /// Map data to the base (noise) space
    pub fn transform_to_noise(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<Array2<f64>> {
        let context = expand_context(context, inputs.nrows())?;
        let (noise, _) = self.transform.forward(inputs, context.as_ref())?;
        Ok(noise)
    }

    /// Generate `num_samples` unconditional samples
    pub fn sample<R: Rng + ?Sized>(&self, num_samples: usize, rng: &mut R) -> Result<Array2<f64>> {
        let noise = self.distribution.sample(num_samples, rng);
        let (samples, _) = self.transform.inverse(&noise, None)?;
        Ok(samples)
    }

    /// Generate `num_samples` samples for every context row
    ///
    /// Returns an array shaped `(context rows, num_samples, features)`.
    pub fn sample_conditional<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        context: &Array2<f64>,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let (samples, _) = self.sample_and_log_prob_conditional(num_samples, context, rng)?;
        Ok(samples)
    }

    /// Generate unconditional samples together with their log densities
    pub fn sample_and_log_prob<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let noise = self.distribution.sample(num_samples, rng);
        let log_pz = self.distribution.log_prob(&noise)?;
        let (samples, log_det) = self.transform.inverse(&noise, None)?;
        Ok((samples, log_pz - log_det))
    }

    /// Generate `num_samples` samples per context row with their log densities
    ///
    /// Samples are shaped `(context rows, num_samples, features)` and log
    /// densities `(context rows, num_samples)`.
    pub fn sample_and_log_prob_conditional<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        context: &Array2<f64>,
        rng: &mut R,
    ) -> Result<(Array3<f64>, Array2<f64>)> {
        let contexts = context.nrows();
        let features = self.features();
        let repeated = repeat_rows(context, num_samples);

        let noise = self.distribution.sample(contexts * num_samples, rng);
        let log_pz = self.distribution.log_prob(&noise)?;
        let (samples, log_det) = self.transform.inverse(&noise, Some(&repeated))?;
        let log_prob = log_pz - log_det;

        let samples = Array3::from_shape_vec(
            (contexts, num_samples, features),
            samples.iter().cloned().collect(),
        )
        .map_err(|_| Error::ShapeMismatch {
            context: "conditional samples",
            expected: contexts * num_samples * features,
            actual: samples.len(),
        })?;
        let log_prob = Array2::from_shape_vec(
            (contexts, num_samples),
            log_prob.iter().cloned().collect(),
        )
        .map_err(|_| Error::ShapeMismatch {
            context: "conditional log densities",
            expected: contexts * num_samples,
            actual: log_prob.len(),
        })?;

        Ok((samples, log_prob))
    }
}

/// Broadcast a single-row context to `rows` rows
fn expand_context(context: Option<&Array2<f64>>, rows: usize) -> Result<Option<Array2<f64>>> {
    match context {
        None => Ok(None),
        Some(ctx) if ctx.nrows() == rows => Ok(Some(ctx.clone())),
        Some(ctx) if ctx.nrows() == 1 => {
            let expanded = ctx
                .broadcast((rows, ctx.ncols()))
                .ok_or(Error::ShapeMismatch {
                    context: "context broadcast",
                    expected: rows,
                    actual: ctx.nrows(),
                })?
                .to_owned();
            Ok(Some(expanded))
        }
        Some(ctx) => Err(Error::ShapeMismatch {
            context: "context batch size",
            expected: rows,
            actual: ctx.nrows(),
        }),
    }
}

/// Repeat every row `times` times consecutively
fn repeat_rows(context: &Array2<f64>, times: usize) -> Array2<f64> {
    Array2::from_shape_fn((context.nrows() * times, context.ncols()), |(i, j)| {
        context[[i / times, j]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::transform::ReversePermutation;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f64::consts::PI;

    fn permutation_flow(features: usize) -> Flow {
        let transform = CompositeTransform::new(vec![Box::new(ReversePermutation::new(features))]);
        Flow::new(transform, StandardNormal::new(vec![features]))
    }

    #[test]
    fn test_volume_preserving_log_prob() {
        let flow = permutation_flow(2);
        let lp = flow.log_prob(&array![[0.0, 0.0]], None).unwrap();
        assert_abs_diff_eq!(lp[0], -(2.0 * PI).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_sample_and_log_prob_agree() {
        let flow = permutation_flow(3);
        let mut rng = StdRng::seed_from_u64(8);
        let (samples, lp) = flow.sample_and_log_prob(5, &mut rng).unwrap();
        let recomputed = flow.log_prob(&samples, None).unwrap();
        for (a, b) in lp.iter().zip(recomputed.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_conditional_sample_shape() {
        let flow = permutation_flow(3);
        let mut rng = StdRng::seed_from_u64(4);
        let context = array![[1.0], [2.0]];
        let (samples, lp) = flow
            .sample_and_log_prob_conditional(5, &context, &mut rng)
            .unwrap();
        assert_eq!(samples.shape(), &[2, 5, 3]);
        assert_eq!(lp.shape(), &[2, 5]);
    }

    #[test]
    fn test_expand_context() {
        let ctx = array![[1.0, 2.0]];
        let expanded = expand_context(Some(&ctx), 3).unwrap().unwrap();
        assert_eq!(expanded.shape(), &[3, 2]);
        assert_eq!(expanded.row(2), ctx.row(0));

        assert!(expand_context(None, 3).unwrap().is_none());
        assert!(expand_context(Some(&Array2::zeros((2, 2))), 3).is_err());
    }

    #[test]
    fn test_repeat_rows() {
        let ctx = array![[1.0, 2.0], [3.0, 4.0]];
        let repeated = repeat_rows(&ctx, 3);
        assert_eq!(
            repeated,
            array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [3.0, 4.0], [3.0, 4.0], [3.0, 4.0]]
        );
    }
}
