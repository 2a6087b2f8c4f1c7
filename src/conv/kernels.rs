//! Direct convolution kernel bodies.
//!
//! The specialized bodies assume their fixed filter/stride shape and that
//! every spatial dimension has already been adjusted to the algorithm's
//! rounded extent; all of them accumulate into an output buffer the caller
//! has pre-zeroed and never touch memory outside the declared extents.

use crate::conv::simd::axpy_f32;
use crate::parallel::par_chunks_indexed;

/// 1x1 stride-1 convolution: a per-pixel channel mix.
///
/// Output spatial extent equals the input extent.
pub fn conv2d_k1x1s1(
    input: &[f32],
    filter: &[f32],
    batch: usize,
    height: usize,
    width: usize,
    in_channels: usize,
    out_channels: usize,
    output: &mut [f32],
) {
    let spatial = height * width;
    par_chunks_indexed(output, spatial, |bm, chunk| {
        let b = bm / out_channels;
        let m = bm % out_channels;
        for c in 0..in_channels {
            let w = filter[m * in_channels + c];
            axpy_f32(chunk, 0, input, (b * in_channels + c) * spatial, w, spatial);
        }
    });
}

/// 3x3 stride-1 convolution over rounded extents.
///
/// Requires `in_height >= out_height + 2` and `in_width >= out_width + 2`.
pub fn conv2d_k3x3s1(
    input: &[f32],
    filter: &[f32],
    batch: usize,
    in_height: usize,
    in_width: usize,
    in_channels: usize,
    out_height: usize,
    out_width: usize,
    out_channels: usize,
    output: &mut [f32],
) {
    par_chunks_indexed(output, out_height * out_width, |bm, chunk| {
        let b = bm / out_channels;
        let m = bm % out_channels;
        for c in 0..in_channels {
            let in_base = (b * in_channels + c) * in_height * in_width;
            let w_base = (m * in_channels + c) * 9;
            for oh in 0..out_height {
                for kh in 0..3 {
                    let in_row = in_base + (oh + kh) * in_width;
                    for kw in 0..3 {
                        axpy_f32(
                            chunk,
                            oh * out_width,
                            input,
                            in_row + kw,
                            filter[w_base + kh * 3 + kw],
                            out_width,
                        );
                    }
                }
            }
        }
    });
}

/// 3x3 stride-2 convolution over rounded extents.
///
/// Requires `in_height >= (out_height - 1) * 2 + 3` and the analogous width
/// bound.
pub fn conv2d_k3x3s2(
    input: &[f32],
    filter: &[f32],
    batch: usize,
    in_height: usize,
    in_width: usize,
    in_channels: usize,
    out_height: usize,
    out_width: usize,
    out_channels: usize,
    output: &mut [f32],
) {
    par_chunks_indexed(output, out_height * out_width, |bm, chunk| {
        let b = bm / out_channels;
        let m = bm % out_channels;
        for c in 0..in_channels {
            let in_base = (b * in_channels + c) * in_height * in_width;
            let w_base = (m * in_channels + c) * 9;
            for oh in 0..out_height {
                for kh in 0..3 {
                    let in_row = in_base + (oh * 2 + kh) * in_width;
                    for kw in 0..3 {
                        let w = filter[w_base + kh * 3 + kw];
                        let out_row = oh * out_width;
                        for ow in 0..out_width {
                            chunk[out_row + ow] += w * input[in_row + ow * 2 + kw];
                        }
                    }
                }
            }
        }
    });
}

/// Generic direct convolution (correlation) with arbitrary filter shape,
/// stride, and dilation; data-parallel over collapsed (batch, out_channel).
pub fn conv2d_nchw(
    input: &[f32],
    filter: &[f32],
    batch: usize,
    in_height: usize,
    in_width: usize,
    in_channels: usize,
    out_height: usize,
    out_width: usize,
    out_channels: usize,
    filter_height: usize,
    filter_width: usize,
    stride_h: usize,
    stride_w: usize,
    dilation_h: usize,
    dilation_w: usize,
    output: &mut [f32],
) {
    par_chunks_indexed(output, out_height * out_width, |bm, chunk| {
        let b = bm / out_channels;
        let m = bm % out_channels;
        for h in 0..out_height {
            for w in 0..out_width {
                let out_idx = h * out_width + w;
                for c in 0..in_channels {
                    let in_base = (b * in_channels + c) * in_height * in_width;
                    let w_base = (m * in_channels + c) * filter_height * filter_width;
                    for kh in 0..filter_height {
                        let ih = h * stride_h + kh * dilation_h;
                        for kw in 0..filter_width {
                            let iw = w * stride_w + kw * dilation_w;
                            chunk[out_idx] +=
                                input[in_base + ih * in_width + iw] * filter[w_base + kh * filter_width + kw];
                        }
                    }
                }
            }
        }
    });
}
