//! Dense feed-forward network
//!
//! `DenseNet` stacks linear layers with an intermediate activation, an output
//! activation, optional context conditioning on the first layer and optional
//! layer or batch normalization. It is the default parameter estimator for
//! coupling transforms.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::layers::{BatchNorm, LayerNorm, Linear};
use crate::config;
use crate::error::{Error, Result};

/// Configuration for a dense network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseNetConfig {
    /// Number of input features
    pub input_dim: usize,
    /// Number of output features (appended to `node_list` when `islast`)
    pub output_dim: usize,
    /// Number of context features, if the network is conditional
    pub context: Option<usize>,
    /// Hidden layer widths
    pub node_list: Vec<usize>,
    /// Activation applied to the final layer
    pub op_activ: Activation,
    /// Activation applied between layers
    pub int_activ: Activation,
    /// Layer normalization after intermediate layers
    pub layernorm: bool,
    /// Batch normalization after intermediate layers
    pub batchnorm: bool,
    /// Whether this network produces the final output (adds an `output_dim` layer)
    pub islast: bool,
}

impl Default for DenseNetConfig {
    fn default() -> Self {
        Self {
            input_dim: 1,
            output_dim: 1,
            context: None,
            node_list: config::DEFAULT_NODE_LIST.to_vec(),
            op_activ: Activation::Identity,
            int_activ: Activation::Relu,
            layernorm: false,
            batchnorm: false,
            islast: true,
        }
    }
}

impl DenseNetConfig {
    /// Create a new configuration
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            ..Default::default()
        }
    }

    /// Set the number of context features
    pub fn with_context(mut self, context: usize) -> Self {
        self.context = Some(context);
        self
    }

    /// Set hidden layer widths
    pub fn with_node_list(mut self, node_list: Vec<usize>) -> Self {
        self.node_list = node_list;
        self
    }

    /// Set output activation
    pub fn with_op_activ(mut self, activation: Activation) -> Self {
        self.op_activ = activation;
        self
    }

    /// Set intermediate activation
    pub fn with_int_activ(mut self, activation: Activation) -> Self {
        self.int_activ = activation;
        self
    }

    pub fn with_layernorm(mut self, layernorm: bool) -> Self {
        self.layernorm = layernorm;
        self
    }

    pub fn with_batchnorm(mut self, batchnorm: bool) -> Self {
        self.batchnorm = batchnorm;
        self
    }

    pub fn with_islast(mut self, islast: bool) -> Self {
        self.islast = islast;
        self
    }

    /// Layer widths after applying `islast`
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut layers = self.node_list.clone();
        if self.islast {
            layers.push(self.output_dim);
        }
        layers
    }
}

/// Normalization applied after intermediate layers
#[derive(Debug, Clone)]
enum Norm {
    Layer(LayerNorm),
    Batch(BatchNorm),
}

/// Dense feed-forward network
#[derive(Debug, Clone)]
pub struct DenseNet {
    config: DenseNetConfig,
    layers: Vec<usize>,
    hidden: Vec<Linear>,
    contextual: Option<Linear>,
    norms: Vec<Norm>,
    training: bool,
}

impl DenseNet {
    /// Build a network with thread-local randomness
    pub fn new(config: DenseNetConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Build a network drawing initial parameters from `rng`
    pub fn with_rng<R: Rng + ?Sized>(mut config: DenseNetConfig, rng: &mut R) -> Result<Self> {
        let layers = config.layer_sizes();
        if layers.is_empty() {
            return Err(Error::InvalidConfig(
                "dense net needs at least one layer: node_list is empty and islast is false"
                    .to_string(),
            ));
        }
        if layers.contains(&0) {
            return Err(Error::InvalidConfig(format!(
                "dense net layer widths must be positive, got {:?}",
                layers
            )));
        }

        if config.layernorm && config.batchnorm {
            log::warn!("Both layernorm and batchnorm were set to True. Turning off layernorm.");
            config.layernorm = false;
        }

        let contextual = match config.context {
            Some(c) => Some(Linear::new(c, layers[0], &mut *rng)),
            None => None,
        };
        if contextual.is_some() && layers.len() == 1 {
            log::warn!("Single-layer dense net: the context projection will not be applied");
        }

        let mut hidden = Vec::with_capacity(layers.len());
        hidden.push(Linear::new(config.input_dim, layers[0], &mut *rng));
        for pair in layers.windows(2) {
            hidden.push(Linear::new(pair[0], pair[1], &mut *rng));
        }

        let intermediate = &layers[..layers.len() - 1];
        let norms = if config.batchnorm {
            intermediate.iter().map(|&d| Norm::Batch(BatchNorm::new(d))).collect()
        } else if config.layernorm {
            intermediate.iter().map(|&d| Norm::Layer(LayerNorm::new(d))).collect()
        } else {
            Vec::new()
        };

        log::debug!(
            "Built dense net {} -> {:?} (context: {:?}, int: {}, op: {})",
            config.input_dim,
            layers,
            config.context,
            config.int_activ,
            config.op_activ
        );

        Ok(Self {
            config,
            layers,
            hidden,
            contextual,
            norms,
            training: false,
        })
    }

    /// Forward pass
    ///
    /// The context projection is added to the output of the first layer; with
    /// a single layer there is no intermediate stage and the context is unused.
    pub fn forward(&self, x: &Array2<f64>, context: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        self.run(x, context, |_, _| {})
    }

    /// Forward pass in training mode that folds each batch-norm layer's batch
    /// statistics into its running statistics
    pub fn update_batch_stats(
        &mut self,
        x: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<Array2<f64>> {
        let was_training = self.training;
        self.training = true;
        let mut pre_norm = Vec::with_capacity(self.norms.len());
        let result = self.run(x, context, |i, h| pre_norm.push((i, h.clone())));
        self.training = was_training;
        let output = result?;

        for (i, h) in pre_norm {
            if let Some(Norm::Batch(bn)) = self.norms.get_mut(i) {
                bn.update_running_stats(&h);
            }
        }
        Ok(output)
    }

    fn run<F>(
        &self,
        x: &Array2<f64>,
        context: Option<&Array2<f64>>,
        mut on_pre_norm: F,
    ) -> Result<Array2<f64>>
    where
        F: FnMut(usize, &Array2<f64>),
    {
        let context_term = match (context, &self.contextual) {
            (Some(_), None) => return Err(Error::MissingContextLayer),
            (Some(ctx), Some(layer)) => {
                if ctx.nrows() != x.nrows() {
                    return Err(Error::ShapeMismatch {
                        context: "context batch size",
                        expected: x.nrows(),
                        actual: ctx.nrows(),
                    });
                }
                Some(layer.forward(ctx)?)
            }
            (None, _) => None,
        };

        let (last, intermediate) = self
            .hidden
            .split_last()
            .ok_or_else(|| Error::InvalidConfig("dense net has no layers".to_string()))?;

        let mut h = x.clone();
        for (i, layer) in intermediate.iter().enumerate() {
            h = layer.forward(&h)?;
            if i == 0 {
                if let Some(ref c) = context_term {
                    h += c;
                }
            }
            if let Some(norm) = self.norms.get(i) {
                on_pre_norm(i, &h);
                h = match norm {
                    Norm::Layer(ln) => ln.forward(&h),
                    Norm::Batch(bn) => bn.forward(&h, self.training),
                };
            }
            let activ = self.config.int_activ;
            h.mapv_inplace(|v| activ.apply(v));
        }

        let mut out = last.forward(&h)?;
        let activ = self.config.op_activ;
        if !activ.is_identity() {
            out.mapv_inplace(|v| activ.apply(v));
        }
        Ok(out)
    }

    /// Switch to training mode
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Switch to evaluation mode
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    /// Width of the final layer
    pub fn output_dim(&self) -> usize {
        *self.layers.last().unwrap_or(&0)
    }

    pub fn context_dim(&self) -> Option<usize> {
        self.config.context
    }

    /// Widths of all linear layers
    pub fn layer_sizes(&self) -> &[usize] {
        &self.layers
    }

    /// Linear layers in application order
    pub fn layers(&self) -> &[Linear] {
        &self.hidden
    }

    /// Mutable access to the linear layers, for loading parameters
    pub fn layers_mut(&mut self) -> &mut [Linear] {
        &mut self.hidden
    }

    /// Effective configuration (after normalization conflicts are resolved)
    pub fn config(&self) -> &DenseNetConfig {
        &self.config
    }

    /// Total number of trainable parameters
    pub fn num_parameters(&self) -> usize {
        let linear: usize = self.hidden.iter().map(Linear::num_parameters).sum();
        let context = self.contextual.as_ref().map_or(0, Linear::num_parameters);
        let norms: usize = self
            .norms
            .iter()
            .map(|n| match n {
                Norm::Layer(ln) => ln.num_parameters(),
                Norm::Batch(bn) => bn.num_parameters(),
            })
            .sum();
        linear + context + norms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_default_layers() {
        let net = DenseNet::with_rng(DenseNetConfig::new(3, 2), &mut rng()).unwrap();
        assert_eq!(net.layer_sizes(), &[10, 10, 2]);
        assert_eq!(net.layers().len(), 3);
        assert_eq!(net.output_dim(), 2);
        // 3*10+10 + 10*10+10 + 10*2+2
        assert_eq!(net.num_parameters(), 172);

        let y = net.forward(&Array2::ones((5, 3)), None).unwrap();
        assert_eq!(y.shape(), &[5, 2]);
    }

    #[test]
    fn test_not_last_keeps_node_list() {
        let config = DenseNetConfig::new(3, 2).with_node_list(vec![8, 4]).with_islast(false);
        let net = DenseNet::with_rng(config, &mut rng()).unwrap();
        assert_eq!(net.layer_sizes(), &[8, 4]);
        assert_eq!(net.output_dim(), 4);
    }

    #[test]
    fn test_empty_layers_rejected() {
        let config = DenseNetConfig::new(3, 2).with_node_list(vec![]).with_islast(false);
        assert!(matches!(
            DenseNet::with_rng(config, &mut rng()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_width_layer_rejected() {
        let config = DenseNetConfig::new(3, 2).with_node_list(vec![4, 0]);
        assert_eq!(config.layer_sizes(), vec![4, 0, 2]);
        assert!(matches!(
            DenseNet::with_rng(config, &mut rng()),
            Err(Error::InvalidConfig(_))
        ));

        // A zero-width input is fine: the first layer then only carries biases
        let config = DenseNetConfig::new(0, 2).with_node_list(vec![4]);
        assert!(DenseNet::with_rng(config, &mut rng()).is_ok());
    }

    #[test]
    fn test_both_norms_keeps_batchnorm() {
        let config = DenseNetConfig::new(2, 1).with_layernorm(true).with_batchnorm(true);
        let net = DenseNet::with_rng(config, &mut rng()).unwrap();
        assert!(net.config().batchnorm);
        assert!(!net.config().layernorm);
        assert!(net.norms.iter().all(|n| matches!(n, Norm::Batch(_))));
        assert_eq!(net.norms.len(), 2);
    }

    #[test]
    fn test_manual_forward() {
        let config = DenseNetConfig::new(2, 1)
            .with_node_list(vec![2])
            .with_context(1);
        let mut net = DenseNet::with_rng(config, &mut rng()).unwrap();
        {
            let layers = net.layers_mut();
            let identity = array![[1.0, 0.0], [0.0, 1.0]];
            layers[0] = Linear::from_parts(identity, array![0.0, 0.0]).unwrap();
            layers[1] = Linear::from_parts(array![[1.0, 1.0]], array![0.5]).unwrap();
        }
        net.contextual = Some(Linear::from_parts(array![[1.0], [-1.0]], array![0.0, 0.0]).unwrap());

        let x = array![[1.0, -2.0]];
        // relu([1, -2]) = [1, 0] -> 1.5
        let y = net.forward(&x, None).unwrap();
        assert_abs_diff_eq!(y[[0, 0]], 1.5, epsilon = 1e-12);

        // context 3 adds [3, -3] before relu: relu([4, -5]) = [4, 0] -> 4.5
        let y = net.forward(&x, Some(&array![[3.0]])).unwrap();
        assert_abs_diff_eq!(y[[0, 0]], 4.5, epsilon = 1e-12);
    }

    #[test]
    fn test_output_activation() {
        let config = DenseNetConfig::new(3, 4).with_op_activ(Activation::Sigmoid);
        let net = DenseNet::with_rng(config, &mut rng()).unwrap();
        let y = net.forward(&Array2::from_elem((6, 3), 5.0), None).unwrap();
        assert!(y.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_context_without_layer_errors() {
        let net = DenseNet::with_rng(DenseNetConfig::new(2, 1), &mut rng()).unwrap();
        let result = net.forward(&Array2::zeros((1, 2)), Some(&Array2::zeros((1, 1))));
        assert!(matches!(result, Err(Error::MissingContextLayer)));
    }

    #[test]
    fn test_context_batch_mismatch() {
        let config = DenseNetConfig::new(2, 1).with_context(3);
        let net = DenseNet::with_rng(config, &mut rng()).unwrap();
        let result = net.forward(&Array2::zeros((4, 2)), Some(&Array2::zeros((2, 3))));
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_input_mismatch() {
        let net = DenseNet::with_rng(DenseNetConfig::new(2, 1), &mut rng()).unwrap();
        assert!(net.forward(&Array2::zeros((1, 5)), None).is_err());
    }

    #[test]
    fn test_single_layer_ignores_context() {
        let config = DenseNetConfig::new(2, 3).with_node_list(vec![]).with_context(2);
        let net = DenseNet::with_rng(config, &mut rng()).unwrap();
        let x = array![[0.3, -0.7]];
        let plain = net.forward(&x, None).unwrap();
        let conditioned = net.forward(&x, Some(&array![[5.0, 5.0]])).unwrap();
        assert_eq!(plain, conditioned);
    }

    #[test]
    fn test_batchnorm_running_stats() {
        let config = DenseNetConfig::new(2, 1).with_node_list(vec![3]).with_batchnorm(true);
        let mut net = DenseNet::with_rng(config, &mut rng()).unwrap();
        assert!(!net.is_training());

        let x = array![[1.0, 2.0], [3.0, -1.0], [0.5, 0.5]];
        let before = net.forward(&x, None).unwrap();
        net.update_batch_stats(&x, None).unwrap();
        assert!(!net.is_training());
        let after = net.forward(&x, None).unwrap();
        assert_ne!(before, after);

        net.train();
        let y = net.forward(&x, None).unwrap();
        assert_eq!(y.shape(), &[3, 1]);
    }

    #[test]
    fn test_layernorm_forward() {
        let config = DenseNetConfig::new(4, 2).with_layernorm(true);
        let net = DenseNet::with_rng(config, &mut rng()).unwrap();
        let y = net.forward(&Array2::from_elem((2, 4), 0.25), None).unwrap();
        assert!(y.iter().all(|v| v.is_finite()));
        // Linear parameters plus gamma and beta of two width-10 layer norms
        assert_eq!(net.num_parameters(), (4 * 10 + 10) + (10 * 10 + 10) + (10 * 2 + 2) + 40);
    }

    #[test]
    fn test_config_json() {
        let json = r#"{"input_dim": 3, "output_dim": 6, "int_activ": "tanh"}"#;
        let config: DenseNetConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.node_list, vec![10, 10]);
        assert_eq!(config.int_activ, Activation::Tanh);
        assert!(config.islast);
    }
}
