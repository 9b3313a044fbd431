//! Rational-Quadratic Spline implementation
//!
//! This module implements the monotonic rational-quadratic spline transformation
//! from "Neural Spline Flows" (Durkan et al., 2019), parameterized by
//! unconstrained values as produced by a conditioner network.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config;
use crate::error::{Error, Result};
use crate::network::activation::softplus;

/// Tolerance added to the last knot when searching for a bin
const BIN_SEARCH_EPS: f64 = 1e-6;

/// Behaviour of the spline outside its interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Tails {
    /// Identity outside `[-tail_bound, tail_bound]`, unit slope at the boundary
    #[default]
    Linear,
    /// Spline on the unit square; inputs outside `[0, 1]` are rejected
    Bounded,
}

impl Tails {
    /// Number of unconstrained parameters per transformed feature
    pub fn param_multiplier(&self, num_bins: usize) -> usize {
        match self {
            Tails::Linear => 3 * num_bins - 1,
            Tails::Bounded => 3 * num_bins + 1,
        }
    }
}

impl FromStr for Tails {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Tails::Linear),
            "bounded" | "none" => Ok(Tails::Bounded),
            other => Err(Error::UnsupportedTails(other.to_string())),
        }
    }
}

impl TryFrom<String> for Tails {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl fmt::Display for Tails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tails::Linear => write!(f, "linear"),
            Tails::Bounded => write!(f, "bounded"),
        }
    }
}

/// Rational-Quadratic Spline transformation
#[derive(Debug, Clone)]
pub struct RationalQuadraticSpline {
    num_bins: usize,
    tails: Tails,
    tail_bound: f64,
    min_bin_width: f64,
    min_bin_height: f64,
    min_derivative: f64,
}

impl RationalQuadraticSpline {
    /// Create a new rational-quadratic spline
    ///
    /// # Arguments
    ///
    /// * `num_bins` - Number of spline bins
    /// * `tails` - Behaviour outside the spline interval
    /// * `tail_bound` - Interval half-width for linear tails
    pub fn new(num_bins: usize, tails: Tails, tail_bound: f64) -> Result<Self> {
        Self::with_minimums(
            num_bins,
            tails,
            tail_bound,
            config::DEFAULT_MIN_BIN_WIDTH,
            config::DEFAULT_MIN_BIN_HEIGHT,
            config::DEFAULT_MIN_DERIVATIVE,
        )
    }

    /// Create a spline with explicit lower limits on bin sizes and derivatives
    pub fn with_minimums(
        num_bins: usize,
        tails: Tails,
        tail_bound: f64,
        min_bin_width: f64,
        min_bin_height: f64,
        min_derivative: f64,
    ) -> Result<Self> {
        if num_bins == 0 {
            return Err(Error::InvalidConfig("num_bins must be positive".to_string()));
        }
        if min_bin_width * num_bins as f64 > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "minimal bin width {} too large for {} bins",
                min_bin_width, num_bins
            )));
        }
        if min_bin_height * num_bins as f64 > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "minimal bin height {} too large for {} bins",
                min_bin_height, num_bins
            )));
        }
        if tails == Tails::Linear && !(tail_bound.is_finite() && tail_bound > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tail bound must be positive, got {}",
                tail_bound
            )));
        }
        if !(min_derivative > 0.0 && min_derivative < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "minimal derivative must lie in (0, 1), got {}",
                min_derivative
            )));
        }

        Ok(Self {
            num_bins,
            tails,
            tail_bound,
            min_bin_width,
            min_bin_height,
            min_derivative,
        })
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn tails(&self) -> Tails {
        self.tails
    }

    pub fn tail_bound(&self) -> f64 {
        self.tail_bound
    }

    /// Get number of parameters per dimension
    pub fn params_per_dim(&self) -> usize {
        self.tails.param_multiplier(self.num_bins)
    }

    /// Forward transformation: x -> y
    ///
    /// Returns (y, log_det) where log_det is the log derivative at x
    pub fn forward(&self, x: f64, raw: &[f64]) -> Result<(f64, f64)> {
        self.transform(x, raw, false)
    }

    /// Inverse transformation: y -> x
    ///
    /// Returns (x, log_det) where log_det is the negated forward log derivative
    pub fn inverse(&self, y: f64, raw: &[f64]) -> Result<(f64, f64)> {
        self.transform(y, raw, true)
    }

    fn transform(&self, value: f64, raw: &[f64], inverse: bool) -> Result<(f64, f64)> {
        if raw.len() != self.params_per_dim() {
            return Err(Error::ShapeMismatch {
                context: "spline parameters",
                expected: self.params_per_dim(),
                actual: raw.len(),
            });
        }

        let k = self.num_bins;
        let widths_raw = &raw[..k];
        let heights_raw = &raw[k..2 * k];

        match self.tails {
            Tails::Linear => {
                let bound = self.tail_bound;
                if value < -bound || value > bound {
                    return Ok((value, 0.0));
                }
                // Boundary derivatives pinned to 1 so the tails join smoothly
                let constant = ((1.0 - self.min_derivative).exp() - 1.0).ln();
                let mut derivatives_raw = Vec::with_capacity(k + 1);
                derivatives_raw.push(constant);
                derivatives_raw.extend_from_slice(&raw[2 * k..]);
                derivatives_raw.push(constant);

                let domain = Domain {
                    left: -bound,
                    right: bound,
                    bottom: -bound,
                    top: bound,
                };
                self.spline(value, widths_raw, heights_raw, &derivatives_raw, &domain, inverse)
            }
            Tails::Bounded => {
                let domain = Domain::unit();
                let (lo, hi) = if inverse {
                    (domain.bottom, domain.top)
                } else {
                    (domain.left, domain.right)
                };
                if value < lo || value > hi {
                    return Err(Error::InputOutsideDomain {
                        value,
                        left: lo,
                        right: hi,
                    });
                }
                self.spline(value, widths_raw, heights_raw, &raw[2 * k..], &domain, inverse)
            }
        }
    }

    fn spline(
        &self,
        value: f64,
        widths_raw: &[f64],
        heights_raw: &[f64],
        derivatives_raw: &[f64],
        domain: &Domain,
        inverse: bool,
    ) -> Result<(f64, f64)> {
        let cumwidths = knots(widths_raw, self.min_bin_width, domain.left, domain.right);
        let cumheights = knots(heights_raw, self.min_bin_height, domain.bottom, domain.top);

        let bin = if inverse {
            find_bin(value, &cumheights)
        } else {
            find_bin(value, &cumwidths)
        };

        let x_k = cumwidths[bin];
        let w_k = cumwidths[bin + 1] - x_k;
        let y_k = cumheights[bin];
        let h_k = cumheights[bin + 1] - y_k;
        let d_k = self.min_derivative + softplus(derivatives_raw[bin]);
        let d_k1 = self.min_derivative + softplus(derivatives_raw[bin + 1]);
        let delta = h_k / w_k;
        let curvature = d_k + d_k1 - 2.0 * delta;

        if inverse {
            let dy = value - y_k;
            let a = dy * curvature + h_k * (delta - d_k);
            let b = h_k * d_k - dy * curvature;
            let c = -delta * dy;

            // Non-negative up to rounding for a monotone spline
            let discriminant = (b * b - 4.0 * a * c).max(0.0);
            let root = (2.0 * c) / (-b - discriminant.sqrt());

            let x = root * w_k + x_k;
            let log_det = log_derivative(root, delta, d_k, d_k1, curvature);
            Ok((x, -log_det))
        } else {
            let xi = (value - x_k) / w_k;
            let xi_one_minus_xi = xi * (1.0 - xi);

            let numerator = h_k * (delta * xi * xi + d_k * xi_one_minus_xi);
            let denominator = delta + curvature * xi_one_minus_xi;
            let y = y_k + numerator / denominator;

            let log_det = log_derivative(xi, delta, d_k, d_k1, curvature);
            Ok((y, log_det))
        }
    }
}

/// Input and output interval of a spline
#[derive(Debug, Clone, Copy)]
struct Domain {
    left: f64,
    right: f64,
    bottom: f64,
    top: f64,
}

impl Domain {
    fn unit() -> Self {
        Self {
            left: 0.0,
            right: 1.0,
            bottom: 0.0,
            top: 1.0,
        }
    }
}

/// log dy/dx at normalized bin position `xi`
fn log_derivative(xi: f64, delta: f64, d_k: f64, d_k1: f64, curvature: f64) -> f64 {
    let one_minus_xi = 1.0 - xi;
    let denominator = delta + curvature * xi * one_minus_xi;
    let numerator = delta
        * delta
        * (d_k1 * xi * xi + 2.0 * delta * xi * one_minus_xi + d_k * one_minus_xi * one_minus_xi);
    numerator.ln() - 2.0 * denominator.ln()
}

/// Knot positions (K + 1 values) from unnormalized bin sizes
///
/// The first and last knots are exactly `lo` and `hi`.
fn knots(raw: &[f64], min_size: f64, lo: f64, hi: f64) -> Vec<f64> {
    let k = raw.len();
    let probs = softmax(raw);
    let scale = 1.0 - min_size * k as f64;

    let mut cumulative = Vec::with_capacity(k + 1);
    cumulative.push(lo);
    let mut acc = 0.0;
    for p in probs {
        acc += min_size + scale * p;
        cumulative.push((hi - lo) * acc + lo);
    }
    cumulative[k] = hi;
    cumulative
}

/// Compute softmax of a slice
fn softmax(x: &[f64]) -> Vec<f64> {
    let max_val = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp_x: Vec<f64> = x.iter().map(|v| (v - max_val).exp()).collect();
    let sum_exp: f64 = exp_x.iter().sum();
    exp_x.into_iter().map(|v| v / sum_exp).collect()
}

/// Find bin index for a value in a sorted knot array
fn find_bin(value: f64, knots: &[f64]) -> usize {
    let last = knots.len() - 1;
    let count = knots
        .iter()
        .enumerate()
        .filter(|&(i, &knot)| {
            let knot = if i == last { knot + BIN_SEARCH_EPS } else { knot };
            value >= knot
        })
        .count();
    count.saturating_sub(1).min(last - 1)
}
