//! Network module
//!
//! Layers and the dense feed-forward network used to estimate coupling
//! transform parameters.

pub mod activation;
pub mod dense;
pub mod layers;

pub use activation::Activation;
pub use dense::{DenseNet, DenseNetConfig};
pub use layers::{BatchNorm, LayerNorm, Linear};
