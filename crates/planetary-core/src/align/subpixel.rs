use ndarray::Array2;

/// Refine a correlation peak with independent parabola fits along each axis.
///
/// The surface is treated as periodic, so a peak on the border (a shift
/// close to zero) still gets refined from its wrapped neighbours.
///
/// Returns (delta_row, delta_col) as fractional offsets from the integer peak,
/// each within +/- 0.5.
pub fn refine_peak_paraboloid(
    correlation: &Array2<f64>,
    peak_row: usize,
    peak_col: usize,
) -> (f64, f64) {
    let (h, w) = correlation.dim();
    let centre = correlation[[peak_row, peak_col]];

    let delta_row = if h >= 3 {
        let prev = correlation[[(peak_row + h - 1) % h, peak_col]];
        let next = correlation[[(peak_row + 1) % h, peak_col]];
        parabola_vertex(prev, centre, next)
    } else {
        0.0
    };

    let delta_col = if w >= 3 {
        let prev = correlation[[peak_row, (peak_col + w - 1) % w]];
        let next = correlation[[peak_row, (peak_col + 1) % w]];
        parabola_vertex(prev, centre, next)
    } else {
        0.0
    };

    (delta_row, delta_col)
}

fn parabola_vertex(prev: f64, centre: f64, next: f64) -> f64 {
    let curvature = prev - 2.0 * centre + next;
    if curvature.abs() > 1e-12 {
        ((prev - next) / (2.0 * curvature)).clamp(-0.5, 0.5)
    } else {
        0.0
    }
}
