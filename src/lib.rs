//! # Coupling Spline Flows
//!
//! Building blocks for normalizing-flow density models.
//!
//! This library provides:
//! - `DenseNet`: a configurable feed-forward network with optional context
//!   conditioning and normalization, used to estimate coupling parameters
//! - Rational-quadratic spline coupling transforms
//! - Factory functions that stack coupling transforms and pair them with a
//!   standard-normal base density into a `Flow`
//!
//! ## Example
//!
//! ```rust,no_run
//! use coupling_spline_flows::prelude::*;
//! use ndarray::Array2;
//!
//! fn main() -> anyhow::Result<()> {
//!     let factory = dense_net_factory(DenseNetConfig::default().with_node_list(vec![32, 32]));
//!     let config = CouplingFlowConfig::new(4).with_num_stacks(2);
//!     let flow = coupling_flow(&config, Some(&factory))?;
//!
//!     let x = Array2::zeros((8, 4));
//!     let log_prob = flow.log_prob(&x, None)?;
//!     println!("log p(x) = {:?}", log_prob);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod flow;
pub mod network;

pub use error::{Error, Result};
pub use flow::{
    coupling_flow, coupling_spline_transformer, dense_net_factory, make_mask, CouplingFlowConfig,
    CouplingSplineConfig, Flow, Tails,
};
pub use network::{Activation, DenseNet, DenseNetConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::flow::{
        coupling_flow, coupling_spline_transformer, dense_net_factory, make_mask, BaseDensity,
        CompositeTransform, ConditionerNet, CouplingFlowConfig, CouplingSplineConfig, Flow,
        NetFactory, PiecewiseRationalQuadraticCoupling, ReversePermutation, StandardNormal, Tails,
        Transform,
    };
    pub use crate::network::{Activation, DenseNet, DenseNetConfig};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Default hidden layer widths of a dense network
    pub const DEFAULT_NODE_LIST: [usize; 2] = [10, 10];

    /// Default input dimension of a coupling transformer
    pub const DEFAULT_INPUT_DIM: usize = 5;

    /// Default number of stacked coupling transforms
    pub const DEFAULT_NUM_STACKS: usize = 4;

    /// Default spline tail bound
    pub const DEFAULT_TAIL_BOUND: f64 = 1.0;

    /// Default number of spline bins
    pub const DEFAULT_NUM_BINS: usize = 8;

    /// Minimum spline bin width
    pub const DEFAULT_MIN_BIN_WIDTH: f64 = 1e-3;

    /// Minimum spline bin height
    pub const DEFAULT_MIN_BIN_HEIGHT: f64 = 1e-3;

    /// Minimum spline knot derivative
    pub const DEFAULT_MIN_DERIVATIVE: f64 = 1e-3;

    /// Momentum of batch-norm running statistics
    pub const BATCH_NORM_MOMENTUM: f64 = 0.1;

    /// Epsilon added to variances in normalization layers
    pub const NORM_EPS: f64 = 1e-5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
