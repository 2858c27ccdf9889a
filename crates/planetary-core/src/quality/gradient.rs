use ndarray::ArrayView2;

/// Mean Sobel gradient magnitude of a region. Higher = sharper.
///
/// Sobel kernels:
///   Gx = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]]
///   Gy = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]]
pub fn gradient_score(data: ArrayView2<f32>) -> f64 {
    let (h, w) = data.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }

    let count = ((h - 2) * (w - 2)) as f64;
    let sum: f64 = data
        .windows((3, 3))
        .into_iter()
        .map(|win| {
            let p = |r: usize, c: usize| win[[r, c]] as f64;
            let gx = -p(0, 0) + p(0, 2) - 2.0 * p(1, 0) + 2.0 * p(1, 2) - p(2, 0) + p(2, 2);
            let gy = -p(0, 0) - 2.0 * p(0, 1) - p(0, 2) + p(2, 0) + 2.0 * p(2, 1) + p(2, 2);
            (gx * gx + gy * gy).sqrt()
        })
        .sum();

    sum / count
}
