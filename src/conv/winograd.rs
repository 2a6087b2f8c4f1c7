//! Winograd convolution for 3x3 stride-1 filters.
//!
//! Supports output tiles of 2 (F(2x2, 3x3), 4x4 transform window) and 6
//! (F(6x6, 3x3), 8x8 transform window). Transform-domain layouts follow the
//! per-tap channel-matrix convention:
//!
//! - filter: `[taps, out_channels, in_channels]`
//! - input:  `[taps, batch, in_channels, tile_count]`
//! - output: `[taps, batch, out_channels, tile_count]`
//!
//! where `taps = (tile + 2)^2`. The per-tap combination is then a plain
//! `(out_channels x in_channels) . (in_channels x tile_count)` product.

use crate::conv::simd::axpy_f32;
use crate::parallel::par_chunks_indexed;

// ── F(2x2, 3x3) tile transforms ──

/// Transform a 3x3 filter tile using G * g * G^T.
/// G is 4x3, g is 3x3, result U is 4x4.
#[inline]
fn filter_tile_4x4(g: &[f32; 9]) -> [f32; 16] {
    // G matrix for F(2x2, 3x3):
    // [ 1     0     0   ]
    // [ 1/2   1/2   1/2 ]
    // [ 1/2  -1/2   1/2 ]
    // [ 0     0     1   ]
    let mut tmp = [0.0f32; 12]; // 4x3
    for j in 0..3 {
        let g0 = g[j];
        let g1 = g[3 + j];
        let g2 = g[6 + j];
        tmp[j] = g0;
        tmp[3 + j] = (g0 + g1 + g2) * 0.5;
        tmp[6 + j] = (g0 - g1 + g2) * 0.5;
        tmp[9 + j] = g2;
    }
    let mut u = [0.0f32; 16];
    for i in 0..4 {
        let t0 = tmp[i * 3];
        let t1 = tmp[i * 3 + 1];
        let t2 = tmp[i * 3 + 2];
        u[i * 4] = t0;
        u[i * 4 + 1] = (t0 + t1 + t2) * 0.5;
        u[i * 4 + 2] = (t0 - t1 + t2) * 0.5;
        u[i * 4 + 3] = t2;
    }
    u
}

/// Transform a 4x4 input tile using B^T * d * B.
#[inline]
fn input_tile_4x4(d: &[f32; 16]) -> [f32; 16] {
    // B^T matrix for F(2x2, 3x3):
    // [ 1   0  -1   0 ]
    // [ 0   1   1   0 ]
    // [ 0  -1   1   0 ]
    // [ 0   1   0  -1 ]
    let mut tmp = [0.0f32; 16];
    for j in 0..4 {
        let d0 = d[j];
        let d1 = d[4 + j];
        let d2 = d[8 + j];
        let d3 = d[12 + j];
        tmp[j] = d0 - d2;
        tmp[4 + j] = d1 + d2;
        tmp[8 + j] = -d1 + d2;
        tmp[12 + j] = d1 - d3;
    }
    let mut v = [0.0f32; 16];
    for i in 0..4 {
        let t0 = tmp[i * 4];
        let t1 = tmp[i * 4 + 1];
        let t2 = tmp[i * 4 + 2];
        let t3 = tmp[i * 4 + 3];
        v[i * 4] = t0 - t2;
        v[i * 4 + 1] = t1 + t2;
        v[i * 4 + 2] = -t1 + t2;
        v[i * 4 + 3] = t1 - t3;
    }
    v
}

/// Inverse transform: A^T * m * A, producing 2x2 output from 4x4.
#[inline]
fn output_tile_4x4(m: &[f32; 16]) -> [f32; 4] {
    // A^T matrix for F(2x2, 3x3):
    // [ 1  1  1  0 ]
    // [ 0  1 -1 -1 ]
    let mut tmp = [0.0f32; 8]; // 2x4
    for j in 0..4 {
        let m0 = m[j];
        let m1 = m[4 + j];
        let m2 = m[8 + j];
        let m3 = m[12 + j];
        tmp[j] = m0 + m1 + m2;
        tmp[4 + j] = m1 - m2 - m3;
    }
    let mut out = [0.0f32; 4];
    for i in 0..2 {
        let t0 = tmp[i * 4];
        let t1 = tmp[i * 4 + 1];
        let t2 = tmp[i * 4 + 2];
        let t3 = tmp[i * 4 + 3];
        out[i * 2] = t0 + t1 + t2;
        out[i * 2 + 1] = t1 - t2 - t3;
    }
    out
}

// ── F(6x6, 3x3) tile transforms ──
//
// Eight-point Cook-Toom matrices (points 0, ±1, ±2, ±1/2 and infinity).

const G8: [[f32; 3]; 8] = [
    [1.0, 0.0, 0.0],
    [-2.0 / 9.0, -2.0 / 9.0, -2.0 / 9.0],
    [-2.0 / 9.0, 2.0 / 9.0, -2.0 / 9.0],
    [1.0 / 90.0, 1.0 / 45.0, 2.0 / 45.0],
    [1.0 / 90.0, -1.0 / 45.0, 2.0 / 45.0],
    [32.0 / 45.0, 16.0 / 45.0, 8.0 / 45.0],
    [32.0 / 45.0, -16.0 / 45.0, 8.0 / 45.0],
    [0.0, 0.0, 1.0],
];

const BT8: [[f32; 8]; 8] = [
    [1.0, 0.0, -5.25, 0.0, 5.25, 0.0, -1.0, 0.0],
    [0.0, 1.0, 1.0, -4.25, -4.25, 1.0, 1.0, 0.0],
    [0.0, -1.0, 1.0, 4.25, -4.25, -1.0, 1.0, 0.0],
    [0.0, 0.5, 0.25, -2.5, -1.25, 2.0, 1.0, 0.0],
    [0.0, -0.5, 0.25, 2.5, -1.25, -2.0, 1.0, 0.0],
    [0.0, 2.0, 4.0, -2.5, -5.0, 0.5, 1.0, 0.0],
    [0.0, -2.0, 4.0, 2.5, -5.0, -0.5, 1.0, 0.0],
    [0.0, -1.0, 0.0, 5.25, 0.0, -5.25, 0.0, 1.0],
];

const AT8: [[f32; 8]; 6] = [
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0],
    [0.0, 1.0, -1.0, 2.0, -2.0, 0.5, -0.5, 0.0],
    [0.0, 1.0, 1.0, 4.0, 4.0, 0.25, 0.25, 0.0],
    [0.0, 1.0, -1.0, 8.0, -8.0, 0.125, -0.125, 0.0],
    [0.0, 1.0, 1.0, 16.0, 16.0, 0.0625, 0.0625, 0.0],
    [0.0, 1.0, -1.0, 32.0, -32.0, 0.03125, -0.03125, 1.0],
];

#[inline]
fn filter_tile_8x8(g: &[f32; 9]) -> [f32; 64] {
    let mut tmp = [0.0f32; 24]; // 8x3
    for i in 0..8 {
        for j in 0..3 {
            tmp[i * 3 + j] = G8[i][0] * g[j] + G8[i][1] * g[3 + j] + G8[i][2] * g[6 + j];
        }
    }
    let mut u = [0.0f32; 64];
    for i in 0..8 {
        for j in 0..8 {
            u[i * 8 + j] =
                tmp[i * 3] * G8[j][0] + tmp[i * 3 + 1] * G8[j][1] + tmp[i * 3 + 2] * G8[j][2];
        }
    }
    u
}

#[inline]
fn input_tile_8x8(d: &[f32; 64]) -> [f32; 64] {
    let mut tmp = [0.0f32; 64];
    for i in 0..8 {
        for j in 0..8 {
            let mut acc = 0.0f32;
            for k in 0..8 {
                acc += BT8[i][k] * d[k * 8 + j];
            }
            tmp[i * 8 + j] = acc;
        }
    }
    let mut v = [0.0f32; 64];
    for i in 0..8 {
        for j in 0..8 {
            let mut acc = 0.0f32;
            for k in 0..8 {
                acc += tmp[i * 8 + k] * BT8[j][k];
            }
            v[i * 8 + j] = acc;
        }
    }
    v
}

#[inline]
fn output_tile_8x8(m: &[f32; 64]) -> [f32; 36] {
    let mut tmp = [0.0f32; 48]; // 6x8
    for i in 0..6 {
        for j in 0..8 {
            let mut acc = 0.0f32;
            for k in 0..8 {
                acc += AT8[i][k] * m[k * 8 + j];
            }
            tmp[i * 8 + j] = acc;
        }
    }
    let mut out = [0.0f32; 36];
    for i in 0..6 {
        for j in 0..6 {
            let mut acc = 0.0f32;
            for k in 0..8 {
                acc += tmp[i * 8 + k] * AT8[j][k];
            }
            out[i * 6 + j] = acc;
        }
    }
    out
}

// ── Whole-tensor transforms ──

/// Transforms an OIHW (out_channels, in_channels, 3, 3) filter into the
/// 16-tap domain used by the 2x2 output tile.
pub fn transform_filter_4x4(
    filter: &[f32],
    in_channels: usize,
    out_channels: usize,
    output: &mut [f32],
) {
    for m in 0..out_channels {
        for c in 0..in_channels {
            let base = (m * in_channels + c) * 9;
            let mut g = [0.0f32; 9];
            g.copy_from_slice(&filter[base..base + 9]);
            let u = filter_tile_4x4(&g);
            for (tap, val) in u.iter().enumerate() {
                output[(tap * out_channels + m) * in_channels + c] = *val;
            }
        }
    }
}

/// Transforms an OIHW (out_channels, in_channels, 3, 3) filter into the
/// 64-tap domain used by the 6x6 output tile.
pub fn transform_filter_8x8(
    filter: &[f32],
    in_channels: usize,
    out_channels: usize,
    output: &mut [f32],
) {
    for m in 0..out_channels {
        for c in 0..in_channels {
            let base = (m * in_channels + c) * 9;
            let mut g = [0.0f32; 9];
            g.copy_from_slice(&filter[base..base + 9]);
            let u = filter_tile_8x8(&g);
            for (tap, val) in u.iter().enumerate() {
                output[(tap * out_channels + m) * in_channels + c] = *val;
            }
        }
    }
}

/// Transforms every input tile of the padded input into the Winograd domain.
///
/// The input extent must equal the rounded output extent plus 2 on each
/// axis; receptive windows of `(tile + 2)^2` taps start every `tile` rows
/// and columns (overlapping by 2).
pub fn transform_input(
    input: &[f32],
    batch: usize,
    in_height: usize,
    in_width: usize,
    in_channels: usize,
    tile: usize,
    output: &mut [f32],
) {
    let tiles_h = (in_height - 2) / tile;
    let tiles_w = (in_width - 2) / tile;
    let tile_count = tiles_h * tiles_w;

    for b in 0..batch {
        for c in 0..in_channels {
            let in_base = (b * in_channels + c) * in_height * in_width;
            let mut t = 0usize;
            for th in 0..tiles_h {
                for tw in 0..tiles_w {
                    let base = in_base + th * tile * in_width + tw * tile;
                    match tile {
                        2 => {
                            let mut d = [0.0f32; 16];
                            for i in 0..4 {
                                let row = base + i * in_width;
                                d[i * 4..i * 4 + 4].copy_from_slice(&input[row..row + 4]);
                            }
                            let v = input_tile_4x4(&d);
                            for (tap, val) in v.iter().enumerate() {
                                output[((tap * batch + b) * in_channels + c) * tile_count + t] =
                                    *val;
                            }
                        }
                        6 => {
                            let mut d = [0.0f32; 64];
                            for i in 0..8 {
                                let row = base + i * in_width;
                                d[i * 8..i * 8 + 8].copy_from_slice(&input[row..row + 8]);
                            }
                            let v = input_tile_8x8(&d);
                            for (tap, val) in v.iter().enumerate() {
                                output[((tap * batch + b) * in_channels + c) * tile_count + t] =
                                    *val;
                            }
                        }
                        _ => panic!("unsupported winograd output tile size {}", tile),
                    }
                    t += 1;
                }
            }
        }
    }
}

/// Per-tap channel combination in the transform domain.
///
/// For every (tap, batch) pair, accumulates the
/// `(out_channels x in_channels) . (in_channels x tile_count)` product into
/// the transformed output; data-parallel over collapsed (tap, batch).
pub fn compute_transformed(
    transformed_filter: &[f32],
    transformed_input: &[f32],
    batch: usize,
    in_channels: usize,
    out_channels: usize,
    tile_count: usize,
    output: &mut [f32],
) {
    par_chunks_indexed(output, out_channels * tile_count, |idx, chunk| {
        let tap = idx / batch;
        let b = idx % batch;
        chunk.fill(0.0);
        for m in 0..out_channels {
            for c in 0..in_channels {
                let w = transformed_filter[(tap * out_channels + m) * in_channels + c];
                axpy_f32(
                    chunk,
                    m * tile_count,
                    transformed_input,
                    ((tap * batch + b) * in_channels + c) * tile_count,
                    w,
                    tile_count,
                );
            }
        }
    });
}

/// Inverse-transforms every output tile into spatial values.
///
/// Writes `tile x tile` blocks into the (possibly padded) output, whose
/// extent must be an exact multiple of the tile size; data-parallel over
/// collapsed (batch, out_channel).
pub fn transform_output(
    transformed_output: &[f32],
    batch: usize,
    out_height: usize,
    out_width: usize,
    out_channels: usize,
    tile: usize,
    output: &mut [f32],
) {
    let tiles_h = out_height / tile;
    let tiles_w = out_width / tile;
    let tile_count = tiles_h * tiles_w;

    par_chunks_indexed(output, out_height * out_width, |bm, chunk| {
        let b = bm / out_channels;
        let m = bm % out_channels;
        let mut t = 0usize;
        for th in 0..tiles_h {
            for tw in 0..tiles_w {
                let dst = th * tile * out_width + tw * tile;
                match tile {
                    2 => {
                        let mut acc = [0.0f32; 16];
                        for (tap, val) in acc.iter_mut().enumerate() {
                            *val = transformed_output
                                [((tap * batch + b) * out_channels + m) * tile_count + t];
                        }
                        let block = output_tile_4x4(&acc);
                        for i in 0..2 {
                            let row = dst + i * out_width;
                            chunk[row..row + 2].copy_from_slice(&block[i * 2..i * 2 + 2]);
                        }
                    }
                    6 => {
                        let mut acc = [0.0f32; 64];
                        for (tap, val) in acc.iter_mut().enumerate() {
                            *val = transformed_output
                                [((tap * batch + b) * out_channels + m) * tile_count + t];
                        }
                        let block = output_tile_8x8(&acc);
                        for i in 0..6 {
                            let row = dst + i * out_width;
                            chunk[row..row + 6].copy_from_slice(&block[i * 6..i * 6 + 6]);
                        }
                    }
                    _ => panic!("unsupported winograd output tile size {}", tile),
                }
                t += 1;
            }
        }
    });
}
