//! Output-shape and padding planning, plus the pad/crop transforms.

use crate::parallel::par_chunks_indexed;
use crate::tensor::Tensor;

/// Named padding policy, when output shape and padding are derived jointly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingPolicy {
    /// Output shrinks by the kernel extent; no padding.
    Valid,
    /// Output keeps the stride-divided input size; padding fills the gap.
    Same,
    /// Output grows by the kernel extent minus one per side.
    Full,
}

/// Computes the NCHW output shape and total (h, w) padding for a policy.
///
/// `input_shape` is NCHW, `filter_shape` OIHW. Fails on degenerate results.
pub fn calc_padding_and_output_size(
    input_shape: [usize; 4],
    filter_shape: [usize; 4],
    strides: [usize; 2],
    dilations: [usize; 2],
    policy: PaddingPolicy,
) -> ([usize; 4], [usize; 2]) {
    assert!(
        dilations[0] > 0 && dilations[1] > 0,
        "invalid dilations {:?}",
        dilations
    );
    assert!(strides[0] > 0 && strides[1] > 0, "invalid strides {:?}", strides);

    let in_h = input_shape[2] as i64;
    let in_w = input_shape[3] as i64;
    let k_extent_h = ((filter_shape[2] - 1) * dilations[0] + 1) as i64;
    let k_extent_w = ((filter_shape[3] - 1) * dilations[1] + 1) as i64;
    let stride_h = strides[0] as i64;
    let stride_w = strides[1] as i64;

    let (out_h, out_w) = match policy {
        PaddingPolicy::Valid => (
            (in_h - k_extent_h) / stride_h + 1,
            (in_w - k_extent_w) / stride_w + 1,
        ),
        PaddingPolicy::Same => ((in_h - 1) / stride_h + 1, (in_w - 1) / stride_w + 1),
        PaddingPolicy::Full => (
            (in_h + k_extent_h - 2) / stride_h + 1,
            (in_w + k_extent_w - 2) / stride_w + 1,
        ),
    };
    assert!(
        out_h > 0 && out_w > 0,
        "degenerate convolution output {}x{}",
        out_h,
        out_w
    );

    let pad_h = ((out_h - 1) * stride_h + k_extent_h - in_h).max(0) as usize;
    let pad_w = ((out_w - 1) * stride_w + k_extent_w - in_w).max(0) as usize;

    (
        [input_shape[0], filter_shape[0], out_h as usize, out_w as usize],
        [pad_h, pad_w],
    )
}

/// Computes the NCHW output shape for an explicit total (h, w) padding,
/// with floor rounding. Fails on degenerate results.
pub fn calc_output_size(
    input_shape: [usize; 4],
    filter_shape: [usize; 4],
    paddings: [usize; 2],
    strides: [usize; 2],
    dilations: [usize; 2],
) -> [usize; 4] {
    assert!(
        dilations[0] > 0 && dilations[1] > 0,
        "invalid dilations {:?}",
        dilations
    );
    assert!(strides[0] > 0 && strides[1] > 0, "invalid strides {:?}", strides);

    let k_extent_h = ((filter_shape[2] - 1) * dilations[0] + 1) as i64;
    let k_extent_w = ((filter_shape[3] - 1) * dilations[1] + 1) as i64;
    let out_h = (input_shape[2] as i64 + paddings[0] as i64 - k_extent_h) / strides[0] as i64 + 1;
    let out_w = (input_shape[3] as i64 + paddings[1] as i64 - k_extent_w) / strides[1] as i64 + 1;
    assert!(
        out_h > 0 && out_w > 0,
        "degenerate convolution output {}x{}",
        out_h,
        out_w
    );

    [input_shape[0], filter_shape[0], out_h as usize, out_w as usize]
}

/// Splits a total padding amount into (leading, trailing), floor-biased.
pub fn split_padding(total: usize) -> (usize, usize) {
    let leading = total / 2;
    (leading, total - leading)
}

/// Builds a zero-padded copy of `input` into `padded`.
///
/// The interior is offset by (`pad_top`, `pad_left`); every other cell stays
/// zero. `padded` is resized to the padded extent first.
pub fn construct_padded_input(
    input: &Tensor,
    pad_top: usize,
    pad_bottom: usize,
    pad_left: usize,
    pad_right: usize,
    padded: &mut Tensor,
) {
    let [batch, channels, height, width] = input.shape();
    let padded_h = height + pad_top + pad_bottom;
    let padded_w = width + pad_left + pad_right;
    padded.resize(batch, channels, padded_h, padded_w);
    padded.zero();

    Tensor::with_buffers(input, padded, |src, dst| {
        for bc in 0..batch * channels {
            let src_base = bc * height * width;
            let dst_base = bc * padded_h * padded_w;
            for h in 0..height {
                let s = src_base + h * width;
                let d = dst_base + (h + pad_top) * padded_w + pad_left;
                dst[d..d + width].copy_from_slice(&src[s..s + width]);
            }
        }
    });
}

/// Crops a padded output back to the logical extent of `output`.
///
/// Output-side padding grows bottom/right only, so each logical row starts
/// at column 0 of the corresponding padded row. Row copies are data-parallel
/// over collapsed (batch, channel).
pub fn crop_padded_output(padded: &Tensor, output: &mut Tensor) {
    let [_, _, height, width] = output.shape();
    let padded_h = padded.h;
    let padded_w = padded.w;

    Tensor::with_buffers(padded, output, |src, dst| {
        par_chunks_indexed(dst, height * width, |bc, chunk| {
            let src_base = bc * padded_h * padded_w;
            for h in 0..height {
                let s = src_base + h * padded_w;
                chunk[h * width..(h + 1) * width].copy_from_slice(&src[s..s + width]);
            }
        });
    });
}
