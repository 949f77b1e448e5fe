//! Full-pipeline tests: lower, plan, pack, co-simulate, verify.

mod common;

use common::Layer;
use fxgen_backend_core::SimHandle;
use fxgen_cosim::RunState;
use ndarray::{Array1, Array2};

#[test]
fn single_layer_with_fusion_verifies() {
    let (graph, output) = common::build_mlp(
        vec![1, 4],
        &[Layer::new("fc0", vec![2, 4], vec![1, 0, -1, 2, 2, 2, 2, 2])
            .with_affine(vec![2], Some(vec![10]))],
    );
    let (mut harness, expected) = common::prepare(graph, output, vec![1, 2, 3, 4]);

    let report = harness.verify();
    assert_eq!(report.state, RunState::Verified);
    assert!(report.passed());
    assert!(report.cycles > 0);
    assert_eq!(harness.hw_output(), expected);
}

#[test]
fn relu_clamps_negative_channels() {
    // Second output channel sums to a negative value before activation.
    let (graph, output) = common::build_mlp(
        vec![1, 3],
        &[Layer::new("fc0", vec![2, 3], vec![1, 1, 1, -1, -1, -1]).with_relu()],
    );
    let (mut harness, expected) = common::prepare(graph, output, vec![2, 3, 4]);

    assert!(harness.verify().passed());
    assert_eq!(expected, vec![9, 0]);
    assert_eq!(harness.hw_output(), vec![9, 0]);
}

#[test]
fn two_layer_chain_verifies() {
    let (graph, output) = common::build_mlp(
        vec![1, 4],
        &[
            Layer::new("fc0", vec![3, 4], vec![1, 0, 0, 1, 0, 1, 1, 0, 1, 1, 1, 1])
                .with_affine(vec![2], Some(vec![4])),
            {
                let mut l = Layer::new("fc1", vec![1, 3], vec![1, -1, 2]);
                l.weight_width = 16;
                l.bias = Some(vec![7]);
                l
            },
        ],
    );
    let (mut harness, expected) = common::prepare(graph, output, vec![1, 2, 3, 4]);

    let report = harness.verify();
    assert_eq!(report.state, RunState::Verified);
    assert_eq!(harness.hw_output(), expected);
}

#[test]
fn hardware_matches_ndarray_reference() {
    let weight_rows = vec![
        vec![1i64, 2, -1, 0],
        vec![0, 1, 1, -2],
        vec![3, 0, 0, 1],
    ];
    let flat: Vec<i64> = weight_rows.iter().flatten().copied().collect();
    let (graph, output) = common::build_mlp(
        vec![1, 4],
        &[Layer::new("fc0", vec![3, 4], flat).with_affine(vec![3], Some(vec![6]))],
    );
    let feed = vec![4, -1, 2, 3];
    let (mut harness, _) = common::prepare(graph, output, feed.clone());
    assert!(harness.verify().passed());

    // Independent reference: x . W^T, then (sum + 6/3) * 3.
    let w = Array2::from_shape_vec(
        (3, 4),
        weight_rows.iter().flatten().map(|&v| v as f64).collect(),
    )
    .unwrap();
    let x = Array1::from_vec(feed.iter().map(|&v| v as f64).collect());
    let reference: Vec<i64> = w.dot(&x).iter().map(|&s| ((s + 2.0) * 3.0) as i64).collect();
    assert_eq!(harness.hw_output(), reference);
}

#[test]
fn elementwise_add_doubles_the_input() {
    use fxgen_graph::IntDType;

    let mut graph = fxgen_graph::Graph::new();
    let a = graph.add_placeholder("act", IntDType::I8, vec![1, 8]);
    let out = fxgen_lower::lower_add(
        &mut graph,
        "add0",
        a,
        a,
        Some(IntDType::I16),
        4,
        &fxgen_lower::LowerOptions::default(),
    )
    .unwrap();
    graph.mark_output(out);

    let (mut harness, expected) =
        common::prepare(graph, out, vec![1, -2, 3, -4, 5, -6, 7, -8]);
    assert!(harness.verify().passed());
    assert_eq!(expected, vec![2, -4, 6, -8, 10, -12, 14, -16]);
    assert_eq!(harness.hw_output(), expected);
}

#[test]
fn cycle_counter_reflects_work() {
    let small = common::build_mlp(vec![1, 2], &[Layer::new("fc0", vec![1, 2], vec![1, 1])]);
    let large = common::build_mlp(
        vec![1, 16],
        &[Layer::new("fc0", vec![8, 16], vec![1; 128])],
    );
    let (mut h_small, _) = common::prepare(small.0, small.1, vec![1, 2]);
    let (mut h_large, _) = common::prepare(large.0, large.1, (0..16).collect());

    let small_cycles = h_small.verify().cycles;
    let large_cycles = h_large.verify().cycles;
    assert!(large_cycles > small_cycles);
    assert_eq!(h_large.sim.cycle_count(), large_cycles);
}
