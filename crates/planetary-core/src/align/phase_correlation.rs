use ndarray::{Array2, ArrayView2, Zip};
use num_complex::Complex;

use crate::consts::PEAK_EXCLUSION_RADIUS;
use crate::error::{Result, StackerError};

use super::fft::{hann_window, Fft2d};
use super::subpixel::refine_peak_paraboloid;

/// Outcome of correlating a target against the reference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correlation {
    /// Displacement of the target content relative to the reference, in pixels.
    pub dx: f64,
    pub dy: f64,
    /// Peak height over the mean absolute background of the surface.
    pub confidence: f64,
}

/// How the cross-power spectrum is weighted before the inverse transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Weighting {
    /// Unit magnitude at every frequency (classic phase correlation).
    Phase,
    /// Raw product, i.e. plain circular cross-correlation. The strongest
    /// structure dominates and low-energy sampling artifacts do not.
    Cross,
}

/// Phase correlator with the reference spectrum computed once.
///
/// The windowed reference FFT is cached, so correlating N targets costs N
/// forward and N inverse transforms. `correlate` takes `&self` and may be
/// called from several threads at once.
#[derive(Clone)]
pub struct PhaseCorrelator {
    fft: Fft2d,
    window: Array2<f64>,
    reference: Array2<Complex<f64>>,
    weighting: Weighting,
}

impl PhaseCorrelator {
    /// Correlator over a Hann-windowed reference.
    pub fn new(reference: ArrayView2<f32>) -> Self {
        let (h, w) = reference.dim();
        Self::with_fft(reference, hann_window(h, w), Fft2d::new(h, w))
    }

    /// Correlator with a caller-supplied window and FFT plan. Both must match
    /// the reference shape.
    pub fn with_fft(reference: ArrayView2<f32>, window: Array2<f64>, fft: Fft2d) -> Self {
        Self::weighted(reference, window, fft, Weighting::Phase)
    }

    pub fn weighted(
        reference: ArrayView2<f32>,
        window: Array2<f64>,
        fft: Fft2d,
        weighting: Weighting,
    ) -> Self {
        let prepared = prepare(reference, &window);
        let reference = fft.forward(&prepared);
        Self {
            fft,
            window,
            reference,
            weighting,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.fft.dim()
    }

    /// Estimate the translation of `target` relative to the reference.
    pub fn correlate(&self, target: ArrayView2<f32>) -> Result<Correlation> {
        let (h, w) = self.dim();
        if target.dim() != (h, w) {
            return Err(StackerError::InvalidInput(format!(
                "Correlation size mismatch: {}x{} vs {}x{}",
                w,
                h,
                target.ncols(),
                target.nrows()
            )));
        }

        let spectrum = self.fft.forward(&prepare(target, &self.window));
        let cross_power = cross_power(&spectrum, &self.reference, self.weighting);
        let surface = self.fft.inverse(cross_power);

        let (peak_row, peak_col, peak_val) = find_peak(&surface);
        let confidence = peak_confidence(&surface, peak_row, peak_col, peak_val);

        // Peaks past the half-way point are negative shifts (wrap-around).
        let dy = if peak_row > h / 2 {
            peak_row as f64 - h as f64
        } else {
            peak_row as f64
        };
        let dx = if peak_col > w / 2 {
            peak_col as f64 - w as f64
        } else {
            peak_col as f64
        };

        let (sub_dy, sub_dx) = refine_peak_paraboloid(&surface, peak_row, peak_col);

        Ok(Correlation {
            dx: dx + sub_dx,
            dy: dy + sub_dy,
            confidence,
        })
    }
}

/// Mean-centre and window a plane. Non-finite samples (outside a warped
/// frame) are replaced by the mean so they contribute nothing.
pub(super) fn prepare(data: ArrayView2<f32>, window: &Array2<f64>) -> Array2<f64> {
    let (sum, n) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
    let mean = if n > 0 { sum / n as f64 } else { 0.0 };

    let mut out = Array2::<f64>::zeros(data.dim());
    Zip::from(&mut out)
        .and(&data)
        .and(window)
        .for_each(|o, &v, &wv| {
            *o = if v.is_finite() {
                (v as f64 - mean) * wv
            } else {
                0.0
            };
        });
    out
}

/// `T * conj(R)`, optionally normalized to unit magnitude, which puts the
/// peak at the target's displacement relative to the reference.
fn cross_power(
    target: &Array2<Complex<f64>>,
    reference: &Array2<Complex<f64>>,
    weighting: Weighting,
) -> Array2<Complex<f64>> {
    let mut result = target.clone();
    Zip::from(&mut result).and(reference).for_each(|t, r| {
        let cross = *t * r.conj();
        *t = match weighting {
            Weighting::Cross => cross,
            Weighting::Phase => {
                let mag = cross.norm();
                if mag > 1e-12 {
                    cross / mag
                } else {
                    Complex::new(0.0, 0.0)
                }
            }
        };
    });
    result
}

fn find_peak(data: &Array2<f64>) -> (usize, usize, f64) {
    data.indexed_iter()
        .fold((0, 0, f64::NEG_INFINITY), |best, ((r, c), &v)| {
            if v > best.2 {
                (r, c, v)
            } else {
                best
            }
        })
}

/// Peak over the mean absolute value of everything outside a small
/// (wrapped) neighbourhood of the peak.
fn peak_confidence(surface: &Array2<f64>, peak_row: usize, peak_col: usize, peak: f64) -> f64 {
    let (h, w) = surface.dim();
    let wrapped = |a: usize, b: usize, n: usize| {
        let d = a.abs_diff(b);
        d.min(n - d)
    };

    let (sum, count) = surface
        .indexed_iter()
        .filter(|((r, c), _)| {
            wrapped(*r, peak_row, h) > PEAK_EXCLUSION_RADIUS
                || wrapped(*c, peak_col, w) > PEAK_EXCLUSION_RADIUS
        })
        .fold((0.0f64, 0usize), |(s, n), (_, v)| (s + v.abs(), n + 1));

    if count == 0 {
        return 0.0;
    }
    let background = sum / count as f64;
    if peak.is_finite() {
        peak / background.max(1e-12)
    } else {
        0.0
    }
}
