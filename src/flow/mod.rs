//! Flow module for rational-quadratic spline coupling flows
//!
//! This module contains:
//! - Rational-quadratic spline transformations
//! - Coupling, permutation and composite transforms
//! - The standard-normal base density and the `Flow` model
//! - Factories assembling coupling transformers and flows

pub mod builder;
pub mod coupling;
pub mod distribution;
pub mod model;
pub mod spline;
pub mod transform;

pub use builder::{
    coupling_flow, coupling_spline_transformer, dense_net_factory, make_mask, BaseDensity,
    CouplingFlowConfig, CouplingSplineConfig,
};
pub use coupling::{ConditionerNet, NetFactory, PiecewiseRationalQuadraticCoupling};
pub use distribution::StandardNormal;
pub use model::Flow;
pub use spline::{RationalQuadraticSpline, Tails};
pub use transform::{CompositeTransform, ReversePermutation, Transform};
