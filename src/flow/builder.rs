//! Factories assembling spline coupling transformers and flows

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::coupling::{ConditionerNet, NetFactory, PiecewiseRationalQuadraticCoupling};
use super::distribution::StandardNormal;
use super::model::Flow;
use super::spline::Tails;
use super::transform::{CompositeTransform, ReversePermutation};
use crate::config;
use crate::error::{Error, Result};
use crate::network::{DenseNet, DenseNetConfig};

/// Default coupling mask: the first `ceil(input_dim / 2)` entries are 1, the rest 0
///
/// Entries greater than zero mark transformed features; zeros mark the
/// identity features that condition the transform.
pub fn make_mask(input_dim: usize) -> Vec<u8> {
    let n_mask = (input_dim + 1) / 2;
    let mut mask = vec![1u8; n_mask];
    mask.resize(input_dim, 0);
    mask
}

/// Configuration of a stacked spline coupling transformer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingSplineConfig {
    /// Number of input features
    pub input_dim: usize,
    /// Number of coupling transforms to stack
    pub num_stacks: usize,
    /// Tail behaviour; linear when unset
    pub tails: Option<Tails>,
    /// Interval half-width of the spline for linear tails
    pub tail_bound: f64,
    /// Number of spline bins
    pub num_bins: usize,
    /// Coupling mask; `make_mask(input_dim)` when unset or of the wrong length
    pub mask: Option<Vec<u8>>,
}

impl Default for CouplingSplineConfig {
    fn default() -> Self {
        Self {
            input_dim: config::DEFAULT_INPUT_DIM,
            num_stacks: config::DEFAULT_NUM_STACKS,
            tails: None,
            tail_bound: config::DEFAULT_TAIL_BOUND,
            num_bins: config::DEFAULT_NUM_BINS,
            mask: None,
        }
    }
}

impl CouplingSplineConfig {
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            ..Default::default()
        }
    }

    pub fn with_num_stacks(mut self, num_stacks: usize) -> Self {
        self.num_stacks = num_stacks;
        self
    }

    pub fn with_tails(mut self, tails: Tails) -> Self {
        self.tails = Some(tails);
        self
    }

    pub fn with_tail_bound(mut self, tail_bound: f64) -> Self {
        self.tail_bound = tail_bound;
        self
    }

    pub fn with_num_bins(mut self, num_bins: usize) -> Self {
        self.num_bins = num_bins;
        self
    }

    pub fn with_mask(mut self, mask: Vec<u8>) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Base density of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum BaseDensity {
    #[default]
    Gaussian,
}

impl FromStr for BaseDensity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gaussian" | "normal" | "standard_normal" => Ok(BaseDensity::Gaussian),
            other => Err(Error::UnsupportedBaseDensity(other.to_string())),
        }
    }
}

impl TryFrom<String> for BaseDensity {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl fmt::Display for BaseDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseDensity::Gaussian => write!(f, "Gaussian"),
        }
    }
}

/// Configuration of a coupling flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CouplingFlowConfig {
    #[serde(flatten)]
    pub transformer: CouplingSplineConfig,
    pub base_density: BaseDensity,
}

impl CouplingFlowConfig {
    pub fn new(input_dim: usize) -> Self {
        Self {
            transformer: CouplingSplineConfig::new(input_dim),
            base_density: BaseDensity::Gaussian,
        }
    }

    /// Parse a configuration from JSON
    ///
    /// Unknown base density or tails names surface as their own errors rather
    /// than as generic JSON errors.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if let Some(name) = value.get("base_density").and_then(|v| v.as_str()) {
            name.parse::<BaseDensity>()?;
        }
        if let Some(name) = value.get("tails").and_then(|v| v.as_str()) {
            name.parse::<Tails>()?;
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn input_dim(&self) -> usize {
        self.transformer.input_dim
    }

    pub fn with_num_stacks(mut self, num_stacks: usize) -> Self {
        self.transformer.num_stacks = num_stacks;
        self
    }

    pub fn with_tails(mut self, tails: Tails) -> Self {
        self.transformer.tails = Some(tails);
        self
    }

    pub fn with_tail_bound(mut self, tail_bound: f64) -> Self {
        self.transformer.tail_bound = tail_bound;
        self
    }

    pub fn with_num_bins(mut self, num_bins: usize) -> Self {
        self.transformer.num_bins = num_bins;
        self
    }

    pub fn with_mask(mut self, mask: Vec<u8>) -> Self {
        self.transformer.mask = Some(mask);
        self
    }

    pub fn with_base_density(mut self, base_density: BaseDensity) -> Self {
        self.base_density = base_density;
        self
    }
}

/// Factory building `DenseNet` conditioners from a template configuration
///
/// The template's `input_dim` and `output_dim` are replaced by the sizes the
/// coupling transform asks for.
pub fn dense_net_factory(
    template: DenseNetConfig,
) -> impl Fn(usize, usize) -> Result<Box<dyn ConditionerNet>> {
    move |in_features, out_features| {
        let config = DenseNetConfig {
            input_dim: in_features,
            output_dim: out_features,
            ..template.clone()
        };
        let net: Box<dyn ConditionerNet> = Box::new(DenseNet::new(config)?);
        Ok(net)
    }
}

/// Stack of rational-quadratic spline coupling transforms
///
/// `num_stacks` coupling transforms sharing the same mask are followed by a
/// single reverse permutation.
pub fn coupling_spline_transformer(
    config: &CouplingSplineConfig,
    net_create_fn: Option<&dyn NetFactory>,
) -> Result<CompositeTransform> {
    let net_create_fn = match net_create_fn {
        Some(f) => f,
        None => {
            log::warn!("No net create function was passed.");
            return Err(Error::MissingNetFactory);
        }
    };

    let input_dim = config.input_dim;
    if input_dim == 0 {
        return Err(Error::InvalidConfig("input_dim must be positive".to_string()));
    }

    let tails = config.tails.unwrap_or(Tails::Linear);

    let mask = match &config.mask {
        Some(mask) if mask.len() == input_dim => mask.clone(),
        other => {
            log::warn!(
                "mask must match the input dimension {}, but entered mask : {:?}. Adjusting mask.",
                input_dim,
                other
            );
            make_mask(input_dim)
        }
    };

    let mut transforms = CompositeTransform::default();
    for _ in 0..config.num_stacks {
        transforms.push(Box::new(PiecewiseRationalQuadraticCoupling::new(
            &mask,
            net_create_fn,
            config.tail_bound,
            config.num_bins,
            tails,
        )?));
    }
    transforms.push(Box::new(ReversePermutation::new(input_dim)));

    log::debug!(
        "Built spline coupling transformer: {} stacks, {} bins, {} tails (bound {}), mask {:?}",
        config.num_stacks,
        config.num_bins,
        tails,
        config.tail_bound,
        mask
    );

    Ok(transforms)
}

/// Coupling flow: a spline coupling transformer over a base density
pub fn coupling_flow(
    config: &CouplingFlowConfig,
    net_create_fn: Option<&dyn NetFactory>,
) -> Result<Flow> {
    let transformer = coupling_spline_transformer(&config.transformer, net_create_fn)?;
    let distribution = match config.base_density {
        BaseDensity::Gaussian => StandardNormal::new(vec![config.input_dim()]),
    };
    Ok(Flow::new(transformer, distribution))
}
