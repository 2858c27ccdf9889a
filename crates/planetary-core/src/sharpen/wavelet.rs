use ndarray::{Array2, Zip};

use crate::consts::{B3_KERNEL, PARALLEL_PIXEL_THRESHOLD};

/// Decompose an image into wavelet detail layers + residual.
///
/// Returns (detail_layers, residual) where the original can be reconstructed as:
/// original = sum(detail_layers) + residual
///
/// Layer 0 holds the finest detail; each following layer doubles the scale.
pub fn decompose(data: &Array2<f32>, num_layers: usize) -> (Vec<Array2<f32>>, Array2<f32>) {
    let mut layers = Vec::with_capacity(num_layers);
    let mut current = data.clone();

    for scale in 0..num_layers {
        let smoothed = b3_smooth(&current, scale);
        let detail = &current - &smoothed;
        layers.push(detail);
        current = smoothed;
    }

    (layers, current)
}

/// Reconstruct an image from gain-scaled detail layers plus the untouched
/// residual, clamped to [0.0, 1.0]. Missing gains count as 1.0.
pub fn reconstruct(layers: &[Array2<f32>], residual: &Array2<f32>, gains: &[f32]) -> Array2<f32> {
    let mut result = residual.clone();

    for (i, layer) in layers.iter().enumerate() {
        let gain = gains.get(i).copied().unwrap_or(1.0);
        result.scaled_add(gain, layer);
    }

    result.mapv_inplace(|v| v.clamp(0.0, 1.0));
    result
}

/// Sharpen one plane with one gain per detail layer (finest first).
pub fn sharpen(data: &Array2<f32>, gains: &[f32]) -> Array2<f32> {
    let (layers, residual) = decompose(data, gains.len());
    reconstruct(&layers, &residual, gains)
}

/// One à-trous smoothing step: the B3 spline kernel applied separably
/// with a dilation of 2^scale (taps read at intervals of 2^scale).
pub fn b3_smooth(data: &Array2<f32>, scale: usize) -> Array2<f32> {
    let step = 1usize << scale;
    let row_convolved = convolve_rows(data, step);
    convolve_cols(&row_convolved, step)
}

fn convolve_rows(data: &Array2<f32>, step: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));

    let kernel_row = |src: ndarray::ArrayView1<f32>, mut out: ndarray::ArrayViewMut1<f32>| {
        for col in 0..w {
            let mut sum = 0.0f32;
            for (ki, &kv) in B3_KERNEL.iter().enumerate() {
                let offset = (ki as isize - 2) * step as isize;
                sum += src[mirror_index(col as isize + offset, w)] * kv;
            }
            out[col] = sum;
        }
    };

    let zip = Zip::from(data.rows()).and(result.rows_mut());
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_for_each(kernel_row);
    } else {
        zip.for_each(kernel_row);
    }
    result
}

fn convolve_cols(data: &Array2<f32>, step: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));

    let kernel_col = |row: usize, mut out: ndarray::ArrayViewMut1<f32>| {
        for (ki, &kv) in B3_KERNEL.iter().enumerate() {
            let offset = (ki as isize - 2) * step as isize;
            let src = data.row(mirror_index(row as isize + offset, h));
            out.scaled_add(kv, &src);
        }
    };

    let zip = Zip::indexed(result.rows_mut());
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_for_each(kernel_col);
    } else {
        zip.for_each(kernel_col);
    }
    result
}

/// Mirror boundary handling: reflect index into [0, size).
/// Even function (f(-k) = f(k)) with period 2*size, ping-ponging within [0, size).
pub fn mirror_index(idx: isize, size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let period = 2 * size;
    let m = idx.unsigned_abs() % period;

    if m < size {
        m
    } else {
        2 * size - 1 - m
    }
}
