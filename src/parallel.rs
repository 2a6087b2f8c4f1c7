//! Collapsed-index data-parallel loops over the rayon worker pool.

use rayon::prelude::*;

/// Runs `op` over `buf` partitioned into contiguous chunks of `chunk`
/// elements, one collapsed index per chunk.
///
/// This replaces nested batch/channel loops whose iterations write disjoint
/// output regions: chunk `i` covers exactly `buf[i * chunk .. (i + 1) *
/// chunk]`, so disjointness holds by construction. Iteration order across
/// chunks is unspecified.
pub fn par_chunks_indexed<F>(buf: &mut [f32], chunk: usize, op: F)
where
    F: Fn(usize, &mut [f32]) + Sync + Send,
{
    if chunk == 0 || buf.is_empty() {
        return;
    }
    buf.par_chunks_mut(chunk)
        .enumerate()
        .for_each(|(i, c)| op(i, c));
}
