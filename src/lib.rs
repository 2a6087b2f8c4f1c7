//! A CPU convolution execution engine.
//!
//! Given an input feature map, a filter, and convolution parameters, this
//! crate plans output shape and padding, selects among specialized
//! convolution algorithms (Winograd, fixed-shape 3x3/1x1 kernels, generic
//! direct), stages transient buffers in a per-invocation scratch arena, and
//! fuses bias addition and activation into the result. All data is
//! single-precision NCHW.
//!
//! # Example
//!
//! ```no_run
//! use microconv::conv::{Activation, Conv2d, PaddingPolicy, PaddingSpec};
//! use microconv::tensor::Tensor;
//!
//! let input = Tensor::new(1, 8, 18, 18);
//! let filter = Tensor::new(8, 8, 3, 3);
//! let mut output = Tensor::empty();
//! let mut conv = Conv2d::new(
//!     [1, 1],
//!     [1, 1],
//!     PaddingSpec::Policy(PaddingPolicy::Valid),
//!     Activation::Relu,
//! );
//! conv.run(&input, &filter, None, &mut output);
//! ```

/// FP32 NCHW tensor with shared-memory storage.
pub mod tensor;
/// Per-invocation scratch memory arena.
pub mod scratch;
/// Collapsed-index data-parallel loops.
pub mod parallel;
/// Convolution planning, dispatch, kernels, and fusion.
pub mod conv;
