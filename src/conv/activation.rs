//! Fused bias addition and elementwise activation.

use rayon::prelude::*;

use crate::parallel::par_chunks_indexed;

/// Elementwise activation applied after bias addition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    /// Rectified linear clamped at the given maximum.
    ReluX(f32),
    Sigmoid,
    Tanh,
}

/// Applies the activation in place over a flat buffer.
pub fn apply_activation(data: &mut [f32], activation: Activation) {
    match activation {
        Activation::Identity => {}
        Activation::Relu => data.par_iter_mut().for_each(|v| *v = v.max(0.0)),
        Activation::ReluX(limit) => data
            .par_iter_mut()
            .for_each(|v| *v = v.max(0.0).min(limit)),
        Activation::Sigmoid => data
            .par_iter_mut()
            .for_each(|v| *v = 1.0 / (1.0 + (-*v).exp())),
        Activation::Tanh => data.par_iter_mut().for_each(|v| *v = v.tanh()),
    }
}

/// Adds one bias scalar per output channel to every spatial position of its
/// channel, in place; data-parallel over collapsed (batch, channel).
pub fn add_bias(output: &mut [f32], bias: &[f32], channels: usize, spatial: usize) {
    par_chunks_indexed(output, spatial, |bc, chunk| {
        let b = bias[bc % channels];
        for v in chunk.iter_mut() {
            *v += b;
        }
    });
}
