use ndarray::{s, Array2, ArrayView2};

use crate::consts::{
    LOG_POLAR_ANGLES, LOG_POLAR_RADII, MAX_ROTATION_RADIANS, MAX_SCALE_RATIO,
    SPECTRUM_OVERSAMPLING,
};
use crate::error::Result;

use super::fft::{hann_1d, radial_window, Fft2d};
use super::phase_correlation::{prepare, PhaseCorrelator, Weighting};
use super::warp::bilinear_sample;

/// Rotation and scale estimator (Fourier-Mellin).
///
/// The magnitude spectrum ignores translation; rotating an image rotates its
/// spectrum and magnifying it shrinks the spectrum. Resampled on a log-polar
/// grid, both become shifts that a correlation can measure:
/// rows are angle over [0, π), columns are log spatial frequency.
pub struct RotationEstimator {
    sampler: LogPolarSampler,
    log_polar: PhaseCorrelator,
}

impl RotationEstimator {
    pub fn new(reference: ArrayView2<f32>) -> Self {
        let sampler = LogPolarSampler::new(reference.dim());

        // Window only the log-radius axis; the angle axis is periodic.
        let radial_taps = hann_1d(LOG_POLAR_RADII);
        let lp_window =
            Array2::from_shape_fn((LOG_POLAR_ANGLES, LOG_POLAR_RADII), |(_, j)| radial_taps[j]);
        let reference_lp = sampler.log_polar_spectrum(reference);
        // Whitening would give the faint, grid-locked interpolation residue
        // the same weight as the texture that actually rotates.
        let log_polar = PhaseCorrelator::weighted(
            reference_lp.view(),
            lp_window,
            Fft2d::new(LOG_POLAR_ANGLES, LOG_POLAR_RADII),
            Weighting::Cross,
        );

        Self { sampler, log_polar }
    }

    /// Rotation (radians) and scale of `target` relative to the reference, or
    /// `None` when the estimate is outside the plausible range.
    pub fn estimate(&self, target: ArrayView2<f32>) -> Result<Option<(f64, f64)>> {
        let target_lp = self.sampler.log_polar_spectrum(target);
        let shift = self.log_polar.correlate(target_lp.view())?;

        let rotation = shift.dy * std::f64::consts::PI / LOG_POLAR_ANGLES as f64;
        let scale = (-shift.dx * self.sampler.log_step).exp();

        if rotation.abs() > MAX_ROTATION_RADIANS
            || !(1.0 / MAX_SCALE_RATIO..=MAX_SCALE_RATIO).contains(&scale)
        {
            return Ok(None);
        }
        Ok(Some((rotation, scale)))
    }
}

struct LogPolarSampler {
    /// Plan over the zero-padded frame.
    fft: Fft2d,
    window: Array2<f64>,
    /// Lowest sampled frequency, cycles per pixel.
    rho_min: f64,
    log_step: f64,
}

impl LogPolarSampler {
    fn new((h, w): (usize, usize)) -> Self {
        let rho_min = 2.0 / h.min(w).max(4) as f64;
        let rho_max = 0.5;
        Self {
            fft: Fft2d::new(h * SPECTRUM_OVERSAMPLING, w * SPECTRUM_OVERSAMPLING),
            window: radial_window(h, w),
            rho_min,
            log_step: (rho_max / rho_min).ln() / (LOG_POLAR_RADII - 1) as f64,
        }
    }

    /// Magnitude spectrum resampled onto the log-polar grid, with each
    /// ring's angular mean removed.
    fn log_polar_spectrum(&self, plane: ArrayView2<f32>) -> Array2<f32> {
        let (h, w) = plane.dim();
        let (ph, pw) = self.fft.dim();
        let mut padded = Array2::<f64>::zeros((ph, pw));
        padded
            .slice_mut(s![..h, ..w])
            .assign(&prepare(plane, &self.window));
        let spectrum = self.fft.forward(&padded);

        // Centre the DC term.
        let (hc, wc) = (ph / 2, pw / 2);
        let magnitude = Array2::from_shape_fn((ph, pw), |(r, c)| {
            spectrum[[(r + ph - hc) % ph, (c + pw - wc) % pw]].norm() as f32
        });
        let view = magnitude.view();

        let mut log_polar = Array2::from_shape_fn((LOG_POLAR_ANGLES, LOG_POLAR_RADII), |(i, j)| {
            let theta = i as f64 * std::f64::consts::PI / LOG_POLAR_ANGLES as f64;
            let rho = self.rho_min * (j as f64 * self.log_step).exp();
            let (sin, cos) = theta.sin_cos();
            let y = hc as f64 + rho * sin * ph as f64;
            let x = wc as f64 + rho * cos * pw as f64;
            let v = bilinear_sample(&view, y, x);
            if v.is_finite() {
                v
            } else {
                0.0
            }
        });

        // A round disc and the radial window look the same at every angle;
        // left in, they pin the correlation peak to zero rotation.
        for mut ring in log_polar.columns_mut() {
            let mean = ring.mean().unwrap_or(0.0);
            ring.mapv_inplace(|v| v - mean);
        }
        log_polar
    }
}
