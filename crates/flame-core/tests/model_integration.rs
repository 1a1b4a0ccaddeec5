//! End-to-end tests: parameter loading, model assembly and forward pass

use flame_core::engine::{BackendPreference, Engine};
use flame_core::params::{BlobSource, MemoryStore};
use flame_core::{FlameError, FlameResult, Model, ModelParams, Shape, Tensor};
use std::sync::Arc;

/// Route the crate's log output through the test harness capture
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_params() -> ModelParams {
    ModelParams::new(&[2, 3], &[8, 16, 32, 12]).unwrap()
}

fn memory_store(params: &ModelParams, seed: u64) -> MemoryStore {
    let mut source = params.clone();
    source.randomize(seed);
    let mut store = MemoryStore::new();
    for (layer, p) in source.layers() {
        store.insert(flame_core::BlobKey::weight(layer).to_string(), p.weights.clone());
        if let Some(bias) = &p.bias {
            store.insert(flame_core::BlobKey::bias(layer).to_string(), bias.clone());
        }
    }
    store
}

#[test]
fn test_zero_weights_reduce_to_head_bias() {
    // all weights zero: head = relu(c5b) everywhere, so
    // score = fcb + sum(fcw * relu(c5b))
    let c5b: Vec<f32> = (0..12).map(|i| i as f32 * 0.5 - 2.0).collect();
    let fcw: Vec<f32> = (0..12).map(|i| 0.1 * (i as f32 + 1.0)).collect();
    let fcb = -0.75f32;

    let mut params = small_params();
    let mut source = |name: &str, dst: &mut [f32]| -> FlameResult<()> {
        match name {
            "c5b" => dst.copy_from_slice(&c5b),
            "fcw" => dst.copy_from_slice(&fcw),
            "fcb" => dst[0] = fcb,
            _ => dst.fill(0.0),
        }
        Ok(())
    };
    params.load(&mut source).unwrap();

    init_logging();
    let mut model = Model::setup(&params, Shape::new(64, 64, 3)).unwrap();
    model.input_mut().fill(0.3);
    let score = model.forward().unwrap();

    let expected = fcb + c5b.iter().zip(&fcw).map(|(b, w)| b.max(0.0) * w).sum::<f32>();
    assert!((score - expected).abs() < 1e-4, "{score} vs {expected}");
}

#[test]
fn test_load_requests_follow_manifest() {
    let mut params = small_params();
    let mut requested = Vec::new();
    let mut source = |name: &str, dst: &mut [f32]| -> FlameResult<()> {
        requested.push((name.to_string(), dst.len()));
        Ok(())
    };
    params.load(&mut source).unwrap();

    let manifest: Vec<(String, usize)> = params
        .manifest()
        .into_iter()
        .map(|(key, n)| (key.to_string(), n))
        .collect();
    assert_eq!(requested, manifest);
    assert_eq!(requested[0].0, "c1w");
    assert_eq!(requested[6].0, "s2r0x1w0");
}

#[test]
fn test_failed_load_leaves_params_untouched() {
    let mut params = small_params();
    params.randomize(1);
    let before = params.clone();

    let mut store = memory_store(&params, 2);
    // s3r1 is an identity block: its branch2 depthwise weights are 16 * 9
    store.insert("s3r1x2w1", vec![0.0; 16 * 9 - 1]);

    let err = params.load(&mut store).unwrap_err();
    match &err {
        FlameError::BlobSize { blob, expected, actual } => {
            assert_eq!(blob, "s3r1x2w1");
            assert_eq!(*expected, 16 * 9 * 4);
            assert_eq!(*actual, (16 * 9 - 1) * 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(params, before);
}

#[test]
fn test_missing_blob_aborts_load() {
    let mut params = small_params();
    let before = params.clone();
    let mut store = memory_store(&params, 3);
    let mut partial = MemoryStore::new();
    for (key, _) in params.manifest() {
        let name = key.to_string();
        if name != "fcb" {
            partial.insert(name.clone(), store.get(&name).unwrap().to_vec());
        }
    }
    assert!(store.fill("fcb", &mut [0.0]).is_ok());

    let err = params.load(&mut partial).unwrap_err();
    assert!(err.is_load());
    assert!(err.to_string().contains("fcb"));
    assert_eq!(params, before);
}

#[test]
fn test_directory_round_trip_gives_same_score() {
    let mut params = small_params();
    params.randomize(42);
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("weights");
    params.save_to_dir(&dir).unwrap();

    let mut reloaded = small_params();
    reloaded.load_from_dir(&dir).unwrap();
    assert_eq!(params, reloaded);

    let input = Tensor::from_vec(
        Shape::new(32, 32, 3),
        (0..32 * 32 * 3).map(|i| ((i % 17) as f32 - 8.0) / 8.0).collect(),
    )
    .unwrap();
    let a = Model::setup(&params, input.shape()).unwrap().forward_with(&input).unwrap();
    let b = Model::setup(&reloaded, input.shape()).unwrap().forward_with(&input).unwrap();
    assert_eq!(a.to_bits(), b.to_bits());
}

#[test]
fn test_forward_is_repeatable_and_models_share_params() {
    let mut params = small_params();
    params.randomize(5);
    let input = Tensor::from_vec(
        Shape::new(40, 40, 3),
        (0..40 * 40 * 3).map(|i| ((i * 7919) % 255) as f32 / 127.5 - 1.0).collect(),
    )
    .unwrap();

    let mut model = Model::setup(&params, input.shape()).unwrap();
    let first = model.forward_with(&input).unwrap();
    let second = model.forward_with(&input).unwrap();
    assert_eq!(first.to_bits(), second.to_bits());

    // the second model binds the same parameter blocks
    let model2 = Model::setup(&params, input.shape()).unwrap();
    assert!(Arc::strong_count(&params.stem) >= 3);

    let handle = std::thread::spawn({
        let input = input.clone();
        let mut model2 = model2;
        move || model2.forward_with(&input).unwrap()
    });
    let threaded = handle.join().unwrap();
    assert_eq!(first.to_bits(), threaded.to_bits());
}

#[test]
fn test_scalar_and_detected_backends_agree() {
    let mut params = small_params();
    params.randomize(9);
    let input = Tensor::from_vec(
        Shape::new(24, 24, 3),
        (0..24 * 24 * 3).map(|i| (i as f32 * 0.013).sin()).collect(),
    )
    .unwrap();

    let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
    let mut model = Model::setup_with_engine(&params, input.shape(), &engine).unwrap();
    let detected = model.forward_with(&input).unwrap();

    // plain kernels as a reference, independent of the running engine
    let reference = reference_score(&params, &input);
    assert!((detected - reference).abs() < 1e-3, "{detected} vs {reference}");
}

#[test]
fn test_reference_architecture_at_224_matches_kernels() {
    init_logging();
    let mut params = ModelParams::reference().unwrap();
    params.randomize(2024);
    let input = Tensor::from_vec(
        Shape::new(224, 224, 3),
        (0..224 * 224 * 3).map(|i| ((i * 7919) % 509) as f32 / 254.5 - 1.0).collect(),
    )
    .unwrap();

    let mut model = Model::setup(&params, input.shape()).unwrap();
    let score = model.forward_with(&input).unwrap();
    let reference = reference_score(&params, &input);
    let tolerance = 1e-3 * reference.abs().max(1.0);
    assert!(score.is_finite());
    assert!((score - reference).abs() < tolerance, "{score} vs {reference}");
}

/// Whole network written out directly against the kernels
fn reference_score(params: &ModelParams, input: &Tensor<f32>) -> f32 {
    use flame_core::kernels::{self, ConvKernel};
    use flame_core::ops::{OperatorParams, Window};
    use flame_core::Backend;

    fn conv(p: &OperatorParams, depthwise: bool, x: &[f32], s: Shape) -> (Vec<f32>, Shape) {
        let (h, w) = p.window.output_size(s.height, s.width).unwrap();
        let out_shape = Shape::new(h, w, p.output_features);
        let mut out = vec![0.0; out_shape.len()];
        let k = ConvKernel {
            weights: &p.weights,
            bias: p.bias.as_deref(),
            window: p.window,
            activation: p.activation,
        };
        if depthwise {
            kernels::depthwise_conv2d_nhwc(&k, x, s, &mut out, out_shape);
        } else {
            kernels::conv2d_nhwc(Backend::Scalar, &k, x, s, &mut out, out_shape);
        }
        (out, out_shape)
    }

    fn branch2(b: &flame_core::shufflenet::Branch2Params, x: &[f32], s: Shape) -> Vec<f32> {
        let (t, ts) = conv(&b.reduce, false, x, s);
        let (t, ts) = conv(&b.depthwise, true, &t, ts);
        conv(&b.expand, false, &t, ts).0
    }

    let (stem, stem_shape) = conv(&params.stem, false, input.as_slice(), input.shape());
    let pool = Window::square(3, 2, 1);
    let (ph, pw) = pool.output_size(stem_shape.height, stem_shape.width).unwrap();
    let mut shape = Shape::new(ph, pw, stem_shape.channels);
    let mut x = vec![0.0; shape.len()];
    kernels::max_pool2d_nhwc(&pool, &stem, stem_shape, &mut x, shape);

    for stage in &params.stages {
        for block in &stage.blocks {
            let (first, second, half_shape) = match &block.branch1 {
                Some(b1) => {
                    let (t, ts) = conv(&b1.depthwise, true, &x, shape);
                    let (a, a_shape) = conv(&b1.pointwise, false, &t, ts);
                    (a, branch2(&block.branch2, &x, shape), a_shape)
                }
                None => {
                    let half = shape.channels / 2;
                    let (mut lo, mut hi) = (Vec::new(), Vec::new());
                    for px in x.chunks_exact(2 * half) {
                        lo.extend_from_slice(&px[..half]);
                        hi.extend_from_slice(&px[half..]);
                    }
                    let hs = shape.with_channels(half);
                    let b = branch2(&block.branch2, &hi, hs);
                    (lo, b, hs)
                }
            };
            x = first.iter().zip(&second).flat_map(|(&a, &b)| [a, b]).collect();
            shape = half_shape.with_channels(half_shape.channels * 2);
        }
    }

    let (head, head_shape) = conv(&params.head, false, &x, shape);
    let mut pooled = vec![0.0; head_shape.channels];
    kernels::global_average_pool_nhwc(&head, head_shape, &mut pooled);
    let mut out = [0.0f32];
    let fc = &params.classifier;
    kernels::fully_connected(
        Backend::Scalar,
        &fc.weights,
        fc.bias.as_deref(),
        fc.activation,
        &pooled,
        &mut out,
    );
    out[0]
}

#[test]
fn test_engine_outlives_models() {
    init_logging();
    let params = small_params();
    let model = Model::setup(&params, Shape::new(16, 16, 3)).unwrap();
    assert!(Engine::active_users() >= 1);
    assert!(Engine::active_backend().is_some());
    assert_eq!(model.engine().backend(), Engine::active_backend().unwrap());
    drop(model);
}
