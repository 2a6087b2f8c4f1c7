use microconv::conv::{
    select_algorithm, winograd_tile_size, Activation, Conv2d, ConvAlgorithm, PaddingPolicy,
    PaddingSpec,
};
use microconv::tensor::Tensor;

/// Fill a tensor with deterministic values based on index.
fn fill_deterministic(t: &Tensor) {
    let mut data = t.write();
    for (i, v) in data.iter_mut().enumerate() {
        *v = ((i as f32) * 0.1 + 0.05).sin();
    }
}

/// Compare two output slices with a given tolerance.
fn assert_approx_eq(a: &[f32], b: &[f32], tol: f32, label: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch {} vs {}", label, a.len(), b.len());
    for (i, (va, vb)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (va - vb).abs() < tol,
            "{}: mismatch at index {}: {} vs {} (diff={})",
            label, i, va, vb, (va - vb).abs()
        );
    }
}

/// Independent reference: plain correlation with explicit total padding
/// (split floor-biased), stride, and dilation.
fn conv2d_reference(
    input: &Tensor,
    filter: &Tensor,
    strides: [usize; 2],
    dilations: [usize; 2],
    paddings: [usize; 2],
) -> Tensor {
    let [batch, in_c, in_h, in_w] = input.shape();
    let [out_c, _, k_h, k_w] = filter.shape();
    let k_extent_h = (k_h - 1) * dilations[0] + 1;
    let k_extent_w = (k_w - 1) * dilations[1] + 1;
    let out_h = (in_h + paddings[0] - k_extent_h) / strides[0] + 1;
    let out_w = (in_w + paddings[1] - k_extent_w) / strides[1] + 1;
    let pad_top = (paddings[0] / 2) as isize;
    let pad_left = (paddings[1] / 2) as isize;

    let output = Tensor::new(batch, out_c, out_h, out_w);
    for n in 0..batch {
        for m in 0..out_c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = 0.0f32;
                    for c in 0..in_c {
                        for kh in 0..k_h {
                            for kw in 0..k_w {
                                let ih = (oh * strides[0] + kh * dilations[0]) as isize - pad_top;
                                let iw = (ow * strides[1] + kw * dilations[1]) as isize - pad_left;
                                if ih >= 0 && iw >= 0 && (ih as usize) < in_h && (iw as usize) < in_w
                                {
                                    sum += input.get(n, c, ih as usize, iw as usize)
                                        * filter.get(m, c, kh, kw);
                                }
                            }
                        }
                    }
                    output.set(n, m, oh, ow, sum);
                }
            }
        }
    }
    output
}

fn run_conv(conv: &mut Conv2d, input: &Tensor, filter: &Tensor) -> Tensor {
    let mut output = Tensor::empty();
    conv.run(input, filter, None, &mut output);
    output
}

// Test 1: 18x18 input with 8 channels selects Winograd with tile size 6
// and matches the reference.
#[test]
fn test_winograd_large_map() {
    let input = Tensor::new(1, 8, 18, 18);
    let filter = Tensor::new(8, 8, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    assert_eq!(
        select_algorithm(3, 3, [1, 1], [1, 1], 8, 8, false),
        ConvAlgorithm::Winograd
    );
    assert_eq!(winograd_tile_size(18, 18), 6);

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 8, 16, 16]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [0, 0]);
    assert_approx_eq(&output.read(), &expected.read(), 5e-3, "winograd tile 6");
}

// Test 2: 10x10 input with 4 channels and stride 2 skips Winograd
// (channels < 8) and takes the 3x3 stride-2 kernel.
#[test]
fn test_k3x3s2_path() {
    let input = Tensor::new(1, 4, 10, 10);
    let filter = Tensor::new(4, 4, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    assert_eq!(
        select_algorithm(3, 3, [2, 2], [1, 1], 4, 4, false),
        ConvAlgorithm::K3x3S2
    );

    let mut conv = Conv2d::new(
        [2, 2],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 4, 4, 4]);

    let expected = conv2d_reference(&input, &filter, [2, 2], [1, 1], [0, 0]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "3x3 stride 2");
}

// Test 3: 1x1 stride-1 filter keeps the spatial extent and matches the
// reference.
#[test]
fn test_k1x1s1_path() {
    let input = Tensor::new(1, 4, 9, 9);
    let filter = Tensor::new(4, 4, 1, 1);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    assert_eq!(
        select_algorithm(1, 1, [1, 1], [1, 1], 4, 4, false),
        ConvAlgorithm::K1x1S1
    );

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 4, 9, 9]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [0, 0]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "1x1 stride 1");
}

// Test 4: 5x5 filter falls through to the generic direct kernel.
#[test]
fn test_generic_direct_path() {
    let input = Tensor::new(1, 3, 12, 12);
    let filter = Tensor::new(2, 3, 5, 5);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    assert_eq!(
        select_algorithm(5, 5, [1, 1], [1, 1], 3, 2, false),
        ConvAlgorithm::Direct
    );

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 2, 8, 8]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [0, 0]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "generic direct");
}

// Test 5: cross-algorithm equivalence on a case where every 3x3 stride-1
// algorithm is eligible, batch > 1.
#[test]
fn test_cross_algorithm_equivalence() {
    let input = Tensor::new(2, 8, 18, 18);
    let filter = Tensor::new(8, 8, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    let padding = PaddingSpec::Policy(PaddingPolicy::Valid);
    let mut winograd =
        Conv2d::with_algorithm([1, 1], [1, 1], padding, Activation::Identity, ConvAlgorithm::Winograd);
    let mut k3x3s1 =
        Conv2d::with_algorithm([1, 1], [1, 1], padding, Activation::Identity, ConvAlgorithm::K3x3S1);
    let mut direct =
        Conv2d::with_algorithm([1, 1], [1, 1], padding, Activation::Identity, ConvAlgorithm::Direct);

    let out_winograd = run_conv(&mut winograd, &input, &filter);
    let out_k3x3s1 = run_conv(&mut k3x3s1, &input, &filter);
    let out_direct = run_conv(&mut direct, &input, &filter);

    assert_approx_eq(
        &out_winograd.read(),
        &out_direct.read(),
        5e-3,
        "winograd vs direct",
    );
    assert_approx_eq(
        &out_k3x3s1.read(),
        &out_direct.read(),
        1e-4,
        "3x3s1 vs direct",
    );
}

// Test 6: maps at 16x16 or below use the 2x2 Winograd tile.
#[test]
fn test_winograd_small_map_tile2() {
    let input = Tensor::new(1, 8, 12, 12);
    let filter = Tensor::new(8, 8, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    assert_eq!(winograd_tile_size(12, 12), 2);
    assert_eq!(winograd_tile_size(16, 16), 2);
    assert_eq!(winograd_tile_size(17, 17), 6);
    assert_eq!(winograd_tile_size(17, 16), 2);

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 8, 10, 10]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [0, 0]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-3, "winograd tile 2");
}

// Test 7: same-policy padding keeps the spatial extent and the cropped
// result equals the reference computed with the derived padding.
#[test]
fn test_same_padding_round_trip() {
    let input = Tensor::new(1, 8, 18, 18);
    let filter = Tensor::new(8, 8, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Same),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 8, 18, 18]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [2, 2]);
    assert_approx_eq(&output.read(), &expected.read(), 5e-3, "same padding");
}

// Test 8: same-policy with stride 2 on the 3x3 stride-2 kernel.
#[test]
fn test_same_padding_stride2() {
    let input = Tensor::new(1, 3, 11, 11);
    let filter = Tensor::new(5, 3, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    let mut conv = Conv2d::new(
        [2, 2],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Same),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 5, 6, 6]);

    let expected = conv2d_reference(&input, &filter, [2, 2], [1, 1], [2, 2]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "same stride 2");
}

// Test 9: explicit padding with floor-rounded output size.
#[test]
fn test_explicit_padding() {
    let input = Tensor::new(1, 4, 9, 9);
    let filter = Tensor::new(4, 4, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Explicit([2, 2]),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 4, 9, 9]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [2, 2]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "explicit padding");
}

// Test 10: dilation routes to the generic kernel and matches the reference.
#[test]
fn test_dilated_convolution() {
    let input = Tensor::new(1, 2, 12, 12);
    let filter = Tensor::new(3, 2, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    assert_eq!(
        select_algorithm(3, 3, [1, 1], [2, 2], 2, 3, false),
        ConvAlgorithm::Direct
    );

    let mut conv = Conv2d::new(
        [1, 1],
        [2, 2],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let output = run_conv(&mut conv, &input, &filter);
    assert_eq!(output.shape(), [1, 3, 8, 8]);

    let expected = conv2d_reference(&input, &filter, [1, 1], [2, 2], [0, 0]);
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "dilation 2");
}

// Test 11: a pre-transformed filter produces the same result as letting the
// functor transform it.
#[test]
fn test_pretransformed_filter() {
    let input = Tensor::new(1, 8, 10, 10);
    let filter = Tensor::new(8, 8, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    // 10x10 input picks the 2x2 tile, so the filter transforms to 16 taps.
    assert_eq!(winograd_tile_size(10, 10), 2);
    let transformed = Tensor::new(16, 8, 8, 1);
    microconv::conv::winograd::transform_filter_4x4(
        &filter.read(),
        8,
        8,
        &mut transformed.write(),
    );

    let padding = PaddingSpec::Policy(PaddingPolicy::Valid);
    let mut plain = Conv2d::new([1, 1], [1, 1], padding, Activation::Identity);
    let expected = run_conv(&mut plain, &input, &filter);

    let mut pre =
        Conv2d::new([1, 1], [1, 1], padding, Activation::Identity).with_transformed_filter();
    let output = run_conv(&mut pre, &input, &transformed);

    assert_eq!(output.shape(), expected.shape());
    assert_approx_eq(&output.read(), &expected.read(), 1e-4, "pretransformed");
}

// Test 12: the transformed-filter cache is never refreshed; mutating the
// filter tensor between runs on one instance yields the first run's output.
#[test]
fn test_transformed_filter_cache_is_stale() {
    let input = Tensor::new(1, 8, 12, 12);
    let filter = Tensor::new(8, 8, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let first = run_conv(&mut conv, &input, &filter);

    filter.fill(0.25);
    let second = run_conv(&mut conv, &input, &filter);
    assert_eq!(
        &first.read()[..],
        &second.read()[..],
        "cached transform must be reused verbatim"
    );

    // A fresh instance sees the mutated filter.
    let mut fresh = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let third = run_conv(&mut fresh, &input, &filter);
    let expected = conv2d_reference(&input, &filter, [1, 1], [1, 1], [0, 0]);
    assert_approx_eq(&third.read(), &expected.read(), 1e-3, "fresh instance");
}

// Test 13: repeated invocations on one instance reuse the scratch arena and
// stay correct.
#[test]
fn test_repeated_invocations() {
    let input = Tensor::new(1, 4, 10, 10);
    let filter = Tensor::new(4, 4, 3, 3);
    fill_deterministic(&input);
    fill_deterministic(&filter);

    let mut conv = Conv2d::new(
        [2, 2],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    let expected = conv2d_reference(&input, &filter, [2, 2], [1, 1], [0, 0]);
    for round in 0..3 {
        let output = run_conv(&mut conv, &input, &filter);
        assert_approx_eq(
            &output.read(),
            &expected.read(),
            1e-4,
            &format!("round {}", round),
        );
    }
}

// Test 14: filter input-channel count mismatching the input aborts.
#[test]
#[should_panic(expected = "filter input channels")]
fn test_channel_mismatch_panics() {
    let input = Tensor::new(1, 3, 8, 8);
    let filter = Tensor::new(4, 4, 3, 3);
    let mut output = Tensor::empty();
    let mut conv = Conv2d::new(
        [1, 1],
        [1, 1],
        PaddingSpec::Policy(PaddingPolicy::Valid),
        Activation::Identity,
    );
    conv.run(&input, &filter, None, &mut output);
}
