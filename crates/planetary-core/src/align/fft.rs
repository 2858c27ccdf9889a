use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayViewMut1, Axis};
use num_complex::Complex;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};

/// Planned 2-D FFT for one array shape.
///
/// Plans are built once and shared; `forward`/`inverse` only need `&self`,
/// so one instance can serve many worker threads.
#[derive(Clone)]
pub struct Fft2d {
    height: usize,
    width: usize,
    row_fwd: Arc<dyn Fft<f64>>,
    col_fwd: Arc<dyn Fft<f64>>,
    row_inv: Arc<dyn Fft<f64>>,
    col_inv: Arc<dyn Fft<f64>>,
}

impl Fft2d {
    pub fn new(height: usize, width: usize) -> Self {
        Self::with_planner(&mut FftPlanner::new(), height, width)
    }

    /// Build from an existing planner so plans of equal length are reused.
    pub fn with_planner(planner: &mut FftPlanner<f64>, height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            row_fwd: planner.plan_fft_forward(width),
            col_fwd: planner.plan_fft_forward(height),
            row_inv: planner.plan_fft_inverse(width),
            col_inv: planner.plan_fft_inverse(height),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Row-wise FFT, then column-wise FFT.
    pub fn forward(&self, data: &Array2<f64>) -> Array2<Complex<f64>> {
        let mut spectrum = data.mapv(|v| Complex::new(v, 0.0));
        transform_lanes(&mut spectrum, Axis(0), self.row_fwd.as_ref());
        transform_lanes(&mut spectrum, Axis(1), self.col_fwd.as_ref());
        spectrum
    }

    /// Inverse 2-D FFT, returning the normalized real part.
    pub fn inverse(&self, mut spectrum: Array2<Complex<f64>>) -> Array2<f64> {
        transform_lanes(&mut spectrum, Axis(1), self.col_inv.as_ref());
        transform_lanes(&mut spectrum, Axis(0), self.row_inv.as_ref());
        let scale = 1.0 / (self.height * self.width) as f64;
        spectrum.mapv(|c| c.re * scale)
    }
}

/// Run `fft` over every lane of `data`. `Axis(0)` iterates rows, `Axis(1)` columns.
fn transform_lanes(data: &mut Array2<Complex<f64>>, axis: Axis, fft: &dyn Fft<f64>) {
    let len = data.shape()[1 - axis.index()];
    let mut scratch = vec![Complex::zero(); fft.get_inplace_scratch_len()];
    let mut line = vec![Complex::zero(); len];

    let mut apply = |mut lane: ArrayViewMut1<Complex<f64>>| {
        for (dst, src) in line.iter_mut().zip(lane.iter()) {
            *dst = *src;
        }
        fft.process_with_scratch(&mut line, &mut scratch);
        for (dst, src) in lane.iter_mut().zip(line.iter()) {
            *dst = *src;
        }
    };

    for lane in data.axis_iter_mut(axis) {
        apply(lane);
    }
}

/// Periodic Hann taps: `0.5 * (1 - cos(2πn/N))`.
pub fn hann_1d(n: usize) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| {
        0.5 * (1.0 - (std::f64::consts::TAU * i as f64 / n as f64).cos())
    })
}

/// Separable 2-D Hann window.
pub fn hann_window(height: usize, width: usize) -> Array2<f64> {
    let wy = hann_1d(height);
    let wx = hann_1d(width);
    Array2::from_shape_fn((height, width), |(r, c)| wy[r] * wx[c])
}

/// Rotation-invariant window: a raised cosine of the distance from the centre,
/// reaching zero at the inscribed circle.
pub fn radial_window(height: usize, width: usize) -> Array2<f64> {
    let cy = (height as f64 - 1.0) / 2.0;
    let cx = (width as f64 - 1.0) / 2.0;
    let radius = (height.min(width) as f64 / 2.0).max(1.0);
    Array2::from_shape_fn((height, width), |(r, c)| {
        let d = ((r as f64 - cy).powi(2) + (c as f64 - cx).powi(2)).sqrt() / radius;
        if d >= 1.0 {
            0.0
        } else {
            0.5 * (1.0 + (std::f64::consts::PI * d).cos())
        }
    })
}
