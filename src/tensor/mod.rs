//! FP32 NCHW tensor with shared-memory storage and scratch-view support.

mod tensor;

pub use tensor::Tensor;
