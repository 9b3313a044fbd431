//! Integration tests for coupling spline flows

use approx::assert_abs_diff_eq;
use coupling_spline_flows::prelude::*;
use ndarray::{array, s, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

fn factory() -> impl Fn(usize, usize) -> Result<Box<dyn ConditionerNet>> {
    dense_net_factory(
        DenseNetConfig::default()
            .with_node_list(vec![16, 16])
            .with_int_activ(Activation::Tanh),
    )
}

#[test]
fn test_flow_full_pipeline() {
    let net_factory = factory();
    let config = CouplingFlowConfig::new(5);
    let flow = coupling_flow(&config, Some(&net_factory)).unwrap();

    // Four couplings and the closing reversal
    assert_eq!(flow.transform().len(), 5);
    assert_eq!(flow.features(), 5);

    let mut rng = StdRng::seed_from_u64(2024);
    let (samples, log_prob) = flow.sample_and_log_prob(32, &mut rng).unwrap();
    assert_eq!(samples.shape(), &[32, 5]);

    let recomputed = flow.log_prob(&samples, None).unwrap();
    for (a, b) in log_prob.iter().zip(recomputed.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-7);
    }
}

#[test]
fn test_far_tails_match_base_density() {
    // Every coordinate beyond the tail bound passes through each spline unchanged
    let net_factory = factory();
    let config = CouplingFlowConfig::new(3).with_tail_bound(1.0);
    let flow = coupling_flow(&config, Some(&net_factory)).unwrap();

    let x = array![[5.0, -6.0, 7.0]];
    let lp = flow.log_prob(&x, None).unwrap();
    let expected = -0.5 * (25.0 + 36.0 + 49.0) - 1.5 * (2.0 * PI).ln();
    assert_abs_diff_eq!(lp[0], expected, epsilon = 1e-10);

    let noise = flow.transform_to_noise(&x, None).unwrap();
    assert_eq!(noise, array![[7.0, -6.0, 5.0]]);
}

#[test]
fn test_density_integrates_to_one_in_1d() {
    let net_factory = factory();
    let config = CouplingFlowConfig::new(1).with_num_stacks(2).with_tail_bound(2.0);
    let flow = coupling_flow(&config, Some(&net_factory)).unwrap();

    let n = 20001;
    let (lo, hi) = (-10.0, 10.0);
    let step = (hi - lo) / (n - 1) as f64;
    let grid = Array2::from_shape_fn((n, 1), |(i, _)| lo + step * i as f64);
    let density = flow.log_prob(&grid, None).unwrap().mapv(f64::exp);
    let integral = density.sum() * step;
    assert_abs_diff_eq!(integral, 1.0, epsilon = 1e-3);
}

#[test]
fn test_conditional_flow_sampling() {
    let conditional = dense_net_factory(DenseNetConfig::default().with_context(2));
    let config = CouplingFlowConfig::new(4).with_num_stacks(2);
    let flow = coupling_flow(&config, Some(&conditional)).unwrap();

    // Five samples for each of the two context rows
    let mut rng = StdRng::seed_from_u64(5);
    let context = array![[0.5, -1.0], [2.0, 0.25]];
    let (samples, log_prob) = flow
        .sample_and_log_prob_conditional(5, &context, &mut rng)
        .unwrap();
    assert_eq!(samples.shape(), &[2, 5, 4]);
    assert_eq!(log_prob.shape(), &[2, 5]);

    // Each group was drawn under its own context row
    for c in 0..2 {
        let group = samples.index_axis(Axis(0), c).to_owned();
        let row_context = context.slice(s![c..c + 1, ..]).to_owned();
        let recomputed = flow.log_prob(&group, Some(&row_context)).unwrap();
        for (a, b) in log_prob.row(c).iter().zip(recomputed.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-7);
        }
    }

    let single = flow.sample_conditional(3, &context.slice(s![..1, ..]).to_owned(), &mut rng);
    assert_eq!(single.unwrap().shape(), &[1, 3, 4]);

    // Wrong context width is rejected by the conditioner
    let bad = Array2::zeros((3, 5));
    assert!(flow.sample_conditional(10, &bad, &mut rng).is_err());
}

#[test]
fn test_invertibility_with_custom_mask() {
    let net_factory = factory();
    let config = CouplingFlowConfig::new(6)
        .with_mask(vec![0, 1, 0, 1, 1, 0])
        .with_num_bins(5)
        .with_tail_bound(2.5);
    let flow = coupling_flow(&config, Some(&net_factory)).unwrap();

    let mut rng = StdRng::seed_from_u64(77);
    let x = Array2::from_shape_fn((20, 6), |_| rng.gen_range(-3.0..3.0));
    let (z, forward_log_det) = flow.transform().forward(&x, None).unwrap();
    let (x_recovered, inverse_log_det) = flow.transform().inverse(&z, None).unwrap();

    for (a, b) in x.iter().zip(x_recovered.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-7);
    }
    for (a, b) in forward_log_det.iter().zip(inverse_log_det.iter()) {
        assert_abs_diff_eq!(a + b, 0.0, epsilon = 1e-7);
    }
}

#[test]
fn test_missing_net_factory() {
    let config = CouplingFlowConfig::new(5);
    assert!(matches!(coupling_flow(&config, None), Err(Error::MissingNetFactory)));
}

#[test]
fn test_flow_from_json() {
    let config = CouplingFlowConfig::from_json_str(
        r#"{"input_dim": 2, "num_stacks": 1, "num_bins": 3, "tail_bound": 4.0,
            "base_density": "gaussian", "tails": "Linear"}"#,
    )
    .unwrap();
    assert_eq!(config.transformer.tails, Some(Tails::Linear));
    let net_factory = factory();
    let flow = coupling_flow(&config, Some(&net_factory)).unwrap();
    assert_eq!(flow.transform().len(), 2);
}
