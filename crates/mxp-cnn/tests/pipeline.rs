//! Orchestrator tests: dispatch, conversions, geometry and outcomes

use mxp_cnn::layers::{ActivationFn, PoolParams};
use mxp_cnn::reference::{max_abs_diff, reference_conv};
use mxp_cnn::zoo::{ConvCase, Xoshiro, ZooModel};
use mxp_cnn::{
    ArithMode, CnnError, ConvSpec, ConvStrategy, Encoding, FracBits, InnerProductSpec, LayerNode,
    LayerSpec, MapGeometry, ModelConfig, Network, Pipeline, RawImage, RunStatus,
};
use mxp_driver::{CoprocConfig, SoftwareBackend, VectorBackend};

fn q(bits: u8) -> FracBits {
    FracBits::new(bits).unwrap()
}

fn coproc() -> SoftwareBackend {
    SoftwareBackend::init(CoprocConfig::SIMULATOR).unwrap()
}

fn conv(rng: &mut Xoshiro, in_maps: usize, out_maps: usize, k: usize) -> ConvSpec {
    ConvSpec::new(
        out_maps,
        k,
        rng.gen_scaled(out_maps * in_maps * k * k, 0.3),
        rng.gen_scaled(out_maps, 0.1),
    )
}

#[test]
fn test_unsupported_kind_aborts_run() {
    let mut rng = Xoshiro::new(1);
    let input_geometry = MapGeometry::new(1, 8, 8);
    let cfg = ModelConfig::new(input_geometry)
        .with_layer(conv(&mut rng, 1, 2, 3))
        .with_layer(LayerSpec::unknown("lrn"))
        .with_layer(LayerSpec::activation(ActivationFn::Relu, ArithMode::Float));
    let mut net = Network::build(&cfg).unwrap();
    let mut pipeline = Pipeline::new();

    let input = rng.gen_f32(input_geometry.len());
    let result = pipeline.run(&mut net, &mut coproc(), &input, input_geometry);

    assert!(matches!(
        &result,
        Err(CnnError::UnsupportedLayer { index: 1, tag }) if tag == "lrn"
    ));
    assert_eq!(RunStatus::of(&result), RunStatus::UnsupportedFeature);
    assert_eq!(pipeline.layers_executed(), 1);

    // The activation after the unknown layer never ran.
    let act = net.layer(2).and_then(LayerNode::as_layer).unwrap();
    assert!(act.output().float().iter().all(|&v| v == 0.0));
}

#[test]
fn test_converts_only_between_disagreeing_layers() {
    let mut rng = Xoshiro::new(2);
    let g = MapGeometry::new(2, 10, 10);
    let cfg = ModelConfig::new(g)
        // float input -> float conv: none
        .with_layer(conv(&mut rng, 2, 3, 3))
        // float -> fixed pool: 1
        .with_layer(LayerSpec::pool(PoolParams::max(2), ArithMode::Fixed))
        // fixed -> fixed act, same bits: none
        .with_layer(LayerSpec::activation(ActivationFn::Relu, ArithMode::Fixed))
        // fixed -> float ip: 2
        .with_layer(InnerProductSpec::new(
            4,
            rng.gen_scaled(4 * 3 * 4 * 4, 0.2),
            rng.gen_scaled(4, 0.1),
        ))
        // softmax is float: none
        .with_layer(LayerSpec::Softmax);
    let mut net = Network::build(&cfg).unwrap();

    let input = rng.gen_f32(g.len());
    let report = Pipeline::new()
        .run(&mut net, &mut coproc(), &input, g)
        .unwrap();

    assert_eq!(report.conversions, 2);
    assert_eq!(report.layers_executed, 5);
    assert_eq!(report.geometry, MapGeometry::new(1, 1, 4));
}

#[test]
fn test_fixed_to_fixed_rescales_between_formats() {
    let mut rng = Xoshiro::new(3);
    let g = MapGeometry::new(1, 8, 8);
    let cfg = ModelConfig::new(g)
        .with_initial_encoding(Encoding::Fixed(q(12)))
        .with_layer(
            conv(&mut rng, 1, 2, 3)
                .with_mode(ArithMode::Fixed)
                .with_frac_bits(q(12), q(12)),
        )
        .with_layer(
            conv(&mut rng, 2, 2, 3)
                .with_mode(ArithMode::Fixed)
                .with_frac_bits(q(10), q(12)),
        );
    let mut net = Network::build(&cfg).unwrap();

    let input = rng.gen_f32(g.len());
    let report = Pipeline::new()
        .run(&mut net, &mut coproc(), &input, g)
        .unwrap();
    assert_eq!(report.conversions, 1);
    assert_eq!(report.geometry, MapGeometry::new(2, 4, 4));
}

#[test]
fn test_input_geometry_mismatch() {
    let model = ZooModel::TinyLenet;
    let mut net = Network::build(&model.config(5).unwrap()).unwrap();
    let wrong = MapGeometry::new(1, 32, 32);
    let input = vec![0.0; wrong.len()];

    let mut pipeline = Pipeline::new();
    let result = pipeline.run(&mut net, &mut coproc(), &input, wrong);
    match &result {
        Err(CnnError::GeometryMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(*expected, model.input());
            assert_eq!(*actual, wrong);
        }
        other => panic!("expected geometry mismatch, got {other:?}"),
    }
    assert_eq!(RunStatus::of(&result).exit_code(), 4);
    assert_eq!(pipeline.layers_executed(), 0);
}

#[test]
fn test_image_geometry_mismatch() {
    let mut net = Network::build(&ZooModel::TinyLenet.config(5).unwrap()).unwrap();
    let image = RawImage::new(20, 20, 1, vec![128u8; 400]).unwrap();
    let err = Pipeline::new()
        .run_image(&mut net, &mut coproc(), &image)
        .unwrap_err();
    assert!(matches!(err, CnnError::GeometryMismatch { .. }));
}

#[test]
fn test_zoo_models_produce_distributions() {
    for model in ZooModel::ALL {
        let mut net = Network::build(&model.config(11).unwrap()).unwrap();
        let input = Xoshiro::new(99).gen_f32(model.input().len());
        let report = Pipeline::new()
            .run(&mut net, &mut coproc(), &input, model.input())
            .unwrap();

        assert_eq!(report.layers_executed, net.len(), "{model}");
        assert_eq!(report.output.len(), 10);
        let sum: f32 = report.output.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "{model}: softmax sums to {sum}");
        assert!(report.output.iter().all(|&p| p >= 0.0));
        assert!(report.top_class().is_some());
    }
}

#[test]
fn test_runs_are_repeatable() {
    let model = ZooModel::ConvStack;
    let mut net = Network::build(&model.config(3).unwrap()).unwrap();
    let mut backend = coproc();
    let input = Xoshiro::new(4).gen_f32(model.input().len());

    let mut pipeline = Pipeline::new();
    let first = pipeline.run(&mut net, &mut backend, &input, model.input()).unwrap();
    let second = pipeline.run(&mut net, &mut backend, &input, model.input()).unwrap();
    assert_eq!(first.output, second.output);
    assert_eq!(first.conversions, second.conversions);
}

#[test]
fn test_strategy_does_not_change_result() {
    let model = ZooModel::TinyLenet;
    let input = Xoshiro::new(8).gen_f32(model.input().len());
    let mut backend = coproc();

    let mut net = Network::build(&model.config(21).unwrap()).unwrap();
    backend.reset_stats();
    let vector = Pipeline::new()
        .run(&mut net, &mut backend, &input, model.input())
        .unwrap();
    assert!(backend.stats().instructions > 0);

    net.conv_mut(0)
        .unwrap()
        .set_strategy(ConvStrategy::Scalar)
        .unwrap();
    backend.reset_stats();
    let scalar = Pipeline::new()
        .run(&mut net, &mut backend, &input, model.input())
        .unwrap();
    assert_eq!(backend.stats().instructions, 0);
    assert_eq!(vector.output, scalar.output);
}

#[test]
fn test_single_conv_network_matches_reference() {
    let case = ConvCase::standard().unwrap();
    let p = case.params;
    let cfg = ModelConfig::new(p.input_geometry()).with_layer(
        ConvSpec::new(p.out_maps, p.kernel_size, case.kernel.clone(), case.bias.clone())
            .with_frac_bits(p.map_frac_bits, p.kernel_frac_bits)
            .with_mode(ArithMode::Fixed)
            .with_strategy(ConvStrategy::Vector),
    );
    let mut net = Network::build(&cfg).unwrap();
    let report = Pipeline::new()
        .run(&mut net, &mut coproc(), &case.input, p.input_geometry())
        .unwrap();

    // float input quantized once for the fixed conv, output dequantized
    assert_eq!(report.conversions, 1);
    let expected = reference_conv(&p, &case.input, &case.kernel, &case.bias).unwrap();
    assert!(max_abs_diff(&report.output, &expected) < 1e-2);
}

#[test]
fn test_empty_network_returns_input() {
    let g = MapGeometry::new(1, 2, 3);
    let mut net = Network::build(&ModelConfig::new(g)).unwrap();
    let input = [0.5f32, -1.0, 2.0, 0.0, 0.25, 3.0];
    let report = Pipeline::new().run(&mut net, &mut coproc(), &input, g).unwrap();
    assert_eq!(report.output, input.to_vec());
    assert_eq!(report.layers_executed, 0);
}
