//! Convolution execution engine.
//!
//! Plans output shape and padding, selects a specialized algorithm from the
//! filter/stride shape, sizes and carves the scratch arena, executes the
//! chosen kernel, and fuses bias addition and activation into the result.

pub mod activation;
pub mod kernels;
pub mod padding;
pub mod simd;
pub mod winograd;

pub use activation::{add_bias, apply_activation, Activation};
pub use padding::{
    calc_output_size, calc_padding_and_output_size, split_padding, PaddingPolicy,
};

use tracing::debug;

use crate::scratch::ScratchArena;
use crate::tensor::Tensor;
use padding::{construct_padded_input, crop_padded_output};

/// Selects which convolution algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvAlgorithm {
    /// Winograd fast convolution for 3x3 stride-1 filters on wide channels.
    Winograd,
    /// Specialized 3x3 stride-1 kernel.
    K3x3S1,
    /// Specialized 3x3 stride-2 kernel.
    K3x3S2,
    /// Specialized 1x1 stride-1 kernel.
    K1x1S1,
    /// Generic nested-loop fallback for arbitrary shapes.
    Direct,
}

/// Padding configuration: derived from a named policy, or explicit total
/// (h, w) amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingSpec {
    Policy(PaddingPolicy),
    Explicit([usize; 2]),
}

/// Picks the algorithm for a filter/stride/dilation/channel combination,
/// first match wins. A pre-transformed filter always takes the Winograd
/// path.
pub fn select_algorithm(
    filter_height: usize,
    filter_width: usize,
    strides: [usize; 2],
    dilations: [usize; 2],
    in_channels: usize,
    out_channels: usize,
    filter_transformed: bool,
) -> ConvAlgorithm {
    let s1 = strides == [1, 1];
    let d1 = dilations == [1, 1];
    let k3 = filter_height == 3 && filter_width == 3;
    if filter_transformed || (k3 && s1 && d1 && in_channels >= 8 && out_channels >= 8) {
        ConvAlgorithm::Winograd
    } else if k3 && s1 && d1 {
        ConvAlgorithm::K3x3S1
    } else if k3 && strides == [2, 2] && d1 {
        ConvAlgorithm::K3x3S2
    } else if filter_height == 1 && filter_width == 1 && s1 && d1 {
        ConvAlgorithm::K1x1S1
    } else {
        ConvAlgorithm::Direct
    }
}

/// Winograd output tile size: larger tiles amortize transform cost when the
/// input feature map is bigger than 16x16.
pub fn winograd_tile_size(in_height: usize, in_width: usize) -> usize {
    if in_height > 16 && in_width > 16 {
        6
    } else {
        2
    }
}

fn round_up(v: usize, factor: usize) -> usize {
    v.div_ceil(factor) * factor
}

/// 2D convolution functor.
///
/// One instance holds per-layer state: the scratch arena reused across
/// invocations and the lazily transformed Winograd filter. Instances are
/// single-writer; concurrent invocations must be serialized by the caller.
pub struct Conv2d {
    strides: [usize; 2],
    dilations: [usize; 2],
    padding: PaddingSpec,
    activation: Activation,
    filter_transformed: bool,
    forced_algorithm: Option<ConvAlgorithm>,
    transformed_filter: Tensor,
    scratch: ScratchArena,
}

impl Conv2d {
    pub fn new(
        strides: [usize; 2],
        dilations: [usize; 2],
        padding: PaddingSpec,
        activation: Activation,
    ) -> Self {
        Conv2d {
            strides,
            dilations,
            padding,
            activation,
            filter_transformed: false,
            forced_algorithm: None,
            transformed_filter: Tensor::empty(),
            scratch: ScratchArena::new(),
        }
    }

    /// Forces a specific algorithm instead of consulting the selector. The
    /// forced family must be valid for the filter/stride shape; the
    /// Winograd tile size is still chosen from the input extent.
    pub fn with_algorithm(
        strides: [usize; 2],
        dilations: [usize; 2],
        padding: PaddingSpec,
        activation: Activation,
        algorithm: ConvAlgorithm,
    ) -> Self {
        let mut functor = Conv2d::new(strides, dilations, padding, activation);
        functor.forced_algorithm = Some(algorithm);
        functor
    }

    /// Marks the filter passed to `run` as already in Winograd transform
    /// domain, shaped `(taps, out_channels, in_channels)`. The tap count
    /// must match the tile size chosen for the input extent; combining a
    /// pre-transformed filter with a declared non-3x3 shape is a
    /// precondition violation.
    pub fn with_transformed_filter(mut self) -> Self {
        self.filter_transformed = true;
        self
    }

    /// Runs one convolution invocation.
    ///
    /// `input` is NCHW, `filter` OIHW (or transform-domain when marked),
    /// `bias` one scalar per output channel. `output` is resized to the
    /// planned shape. Violated preconditions abort.
    pub fn run(
        &mut self,
        input: &Tensor,
        filter: &Tensor,
        bias: Option<&Tensor>,
        output: &mut Tensor,
    ) {
        // Logical OIHW filter shape; a transform-domain filter is stored as
        // (taps, out_channels, in_channels).
        let filter_shape = if self.filter_transformed {
            [filter.dim(1), filter.dim(2), 3, 3]
        } else {
            filter.shape()
        };

        let (output_shape, paddings) = match self.padding {
            PaddingSpec::Policy(policy) => calc_padding_and_output_size(
                input.shape(),
                filter_shape,
                self.strides,
                self.dilations,
                policy,
            ),
            PaddingSpec::Explicit(p) => (
                calc_output_size(input.shape(), filter_shape, p, self.strides, self.dilations),
                p,
            ),
        };
        output.resize(output_shape[0], output_shape[1], output_shape[2], output_shape[3]);
        output.zero();

        let batch = output.n;
        let channels = output.c;
        let height = output.h;
        let width = output.w;

        let input_channels = input.c;
        let input_height = input.h;
        let input_width = input.w;

        let filter_h = filter_shape[2];
        let filter_w = filter_shape[3];
        assert_eq!(
            filter_shape[0], channels,
            "filter output channels mismatch declared output channels"
        );
        assert_eq!(
            filter_shape[1], input_channels,
            "filter input channels mismatch input channels"
        );
        assert_eq!(input.n, batch, "input/output batch size mismatch");

        let [stride_h, stride_w] = self.strides;
        let [dilation_h, dilation_w] = self.dilations;

        let padded_input_height = input_height + paddings[0];
        let padded_input_width = input_width + paddings[1];
        let mut extra_input_height = padded_input_height;
        let mut extra_input_width = padded_input_width;
        let mut extra_output_height = height;
        let mut extra_output_width = width;

        let (pad_top, mut pad_bottom) = split_padding(paddings[0]);
        let (pad_left, mut pad_right) = split_padding(paddings[1]);

        let algorithm = self.forced_algorithm.unwrap_or_else(|| {
            select_algorithm(
                filter_h,
                filter_w,
                self.strides,
                self.dilations,
                input_channels,
                channels,
                self.filter_transformed,
            )
        });
        let tile = winograd_tile_size(input_height, input_width);

        // Round spatial extents up to the algorithm's granularity; growth
        // goes to the bottom/right pad only.
        match algorithm {
            ConvAlgorithm::Winograd => {
                extra_output_height = round_up(height, tile);
                extra_input_height = padded_input_height.max(extra_output_height + 2);
                extra_output_width = round_up(width, tile);
                extra_input_width = padded_input_width.max(extra_output_width + 2);
                pad_bottom += extra_input_height - padded_input_height;
                pad_right += extra_input_width - padded_input_width;
            }
            ConvAlgorithm::K3x3S1 => {
                extra_output_height = round_up(height, 2);
                extra_input_height = padded_input_height.max(extra_output_height + 2);
                extra_output_width = round_up(width, 4);
                extra_input_width = padded_input_width.max(extra_output_width + 2);
                pad_bottom += extra_input_height - padded_input_height;
                pad_right += extra_input_width - padded_input_width;
            }
            ConvAlgorithm::K3x3S2 => {
                extra_input_height = padded_input_height.max((extra_output_height - 1) * 2 + 3);
                extra_output_width = round_up(width, 4);
                extra_input_width = padded_input_width.max((extra_output_width - 1) * 2 + 3);
                pad_bottom += extra_input_height - padded_input_height;
                pad_right += extra_input_width - padded_input_width;
            }
            ConvAlgorithm::K1x1S1 | ConvAlgorithm::Direct => {}
        }

        let taps = (tile + 2) * (tile + 2);
        let tile_count = (extra_output_height / tile) * (extra_output_width / tile);

        // Scratch sizing, then carving in fixed order; unneeded views are
        // carved with size zero so offsets never shift between algorithms.
        let elem = std::mem::size_of::<f32>();
        let mut transformed_input_size = 0;
        let mut transformed_output_size = 0;
        let mut padded_input_size = 0;
        let mut padded_output_size = 0;
        let mut total_scratch_size = 0;
        if algorithm == ConvAlgorithm::Winograd {
            transformed_input_size = taps * batch * input_channels * tile_count * elem;
            transformed_output_size = taps * batch * channels * tile_count * elem;
            total_scratch_size += transformed_input_size + transformed_output_size;
        }
        let input_padded =
            extra_input_height != input_height || extra_input_width != input_width;
        if input_padded {
            padded_input_size = batch
                * input_channels
                * (input_height + pad_top + pad_bottom)
                * (input_width + pad_left + pad_right)
                * elem;
            total_scratch_size += padded_input_size;
        }
        let output_padded = extra_output_height != height || extra_output_width != width;
        if output_padded {
            padded_output_size =
                batch * channels * extra_output_height * extra_output_width * elem;
            total_scratch_size += padded_output_size;
        }

        debug!(
            ?algorithm,
            tile,
            scratch_bytes = total_scratch_size,
            "selected convolution path"
        );

        self.scratch.rewind();
        self.scratch.grow_to_at_least(total_scratch_size);
        let mut transformed_input = self.scratch.carve(transformed_input_size);
        let mut transformed_output = self.scratch.carve(transformed_output_size);
        let mut padded_input = self.scratch.carve(padded_input_size);
        let mut padded_output = self.scratch.carve(padded_output_size);

        let conv_input: &Tensor = if input_padded {
            construct_padded_input(
                input, pad_top, pad_bottom, pad_left, pad_right, &mut padded_input,
            );
            &padded_input
        } else {
            input
        };

        if output_padded {
            padded_output.resize(batch, channels, extra_output_height, extra_output_width);
            padded_output.zero();
        }
        let conv_output: &Tensor = if output_padded { &padded_output } else { &*output };

        match algorithm {
            ConvAlgorithm::Winograd => {
                transformed_input.resize(taps, batch, input_channels, tile_count);
                transformed_output.resize(taps, batch, channels, tile_count);

                // The transform-domain filter is computed once per instance
                // and reused on every later invocation, even if the filter
                // tensor's contents have changed since.
                if !self.filter_transformed && self.transformed_filter.is_empty() {
                    self.transformed_filter.resize(taps, channels, input_channels, 1);
                    match tile {
                        2 => winograd::transform_filter_4x4(
                            &filter.read(),
                            input_channels,
                            channels,
                            &mut self.transformed_filter.write(),
                        ),
                        6 => winograd::transform_filter_8x8(
                            &filter.read(),
                            input_channels,
                            channels,
                            &mut self.transformed_filter.write(),
                        ),
                        _ => panic!("unsupported winograd output tile size {}", tile),
                    }
                }
                let transformed = if self.filter_transformed {
                    filter
                } else {
                    &self.transformed_filter
                };

                Tensor::with_buffers(conv_input, &transformed_input, |src, dst| {
                    winograd::transform_input(
                        src,
                        batch,
                        extra_input_height,
                        extra_input_width,
                        input_channels,
                        tile,
                        dst,
                    )
                });
                {
                    let filter_taps = transformed.read();
                    Tensor::with_buffers(&transformed_input, &transformed_output, |src, dst| {
                        winograd::compute_transformed(
                            &filter_taps,
                            src,
                            batch,
                            input_channels,
                            channels,
                            tile_count,
                            dst,
                        )
                    });
                }
                Tensor::with_buffers(&transformed_output, conv_output, |src, dst| {
                    winograd::transform_output(
                        src,
                        batch,
                        extra_output_height,
                        extra_output_width,
                        channels,
                        tile,
                        dst,
                    )
                });
            }
            ConvAlgorithm::K3x3S1 => {
                Tensor::with_buffers(conv_input, conv_output, |src, dst| {
                    kernels::conv2d_k3x3s1(
                        src,
                        &filter.read(),
                        batch,
                        extra_input_height,
                        extra_input_width,
                        input_channels,
                        extra_output_height,
                        extra_output_width,
                        channels,
                        dst,
                    )
                });
            }
            ConvAlgorithm::K3x3S2 => {
                Tensor::with_buffers(conv_input, conv_output, |src, dst| {
                    kernels::conv2d_k3x3s2(
                        src,
                        &filter.read(),
                        batch,
                        extra_input_height,
                        extra_input_width,
                        input_channels,
                        extra_output_height,
                        extra_output_width,
                        channels,
                        dst,
                    )
                });
            }
            ConvAlgorithm::K1x1S1 => {
                Tensor::with_buffers(conv_input, conv_output, |src, dst| {
                    kernels::conv2d_k1x1s1(
                        src,
                        &filter.read(),
                        batch,
                        extra_input_height,
                        extra_input_width,
                        input_channels,
                        channels,
                        dst,
                    )
                });
            }
            ConvAlgorithm::Direct => {
                Tensor::with_buffers(conv_input, conv_output, |src, dst| {
                    kernels::conv2d_nchw(
                        src,
                        &filter.read(),
                        batch,
                        extra_input_height,
                        extra_input_width,
                        input_channels,
                        extra_output_height,
                        extra_output_width,
                        channels,
                        filter_h,
                        filter_w,
                        stride_h,
                        stride_w,
                        dilation_h,
                        dilation_w,
                        dst,
                    )
                });
            }
        }

        if output_padded {
            crop_padded_output(&padded_output, output);
        }

        if let Some(bias) = bias {
            add_bias(&mut output.write(), &bias.read(), channels, height * width);
        }
        apply_activation(&mut output.write(), self.activation);
    }
}
