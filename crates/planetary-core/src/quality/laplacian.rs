use ndarray::ArrayView2;

/// Laplacian variance of a region. Higher means sharper.
///
/// Convolves with the 3x3 Laplacian kernel:
///   0  1  0
///   1 -4  1
///   0  1  0
/// over every full 3x3 window and returns the variance of the response.
pub fn laplacian_variance(data: ArrayView2<f32>) -> f64 {
    let (h, w) = data.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }

    let count = ((h - 2) * (w - 2)) as f64;
    let (sum, sum_sq) = data
        .windows((3, 3))
        .into_iter()
        .fold((0.0f64, 0.0f64), |(sum, sum_sq), win| {
            let lap = -4.0 * win[[1, 1]] as f64
                + win[[0, 1]] as f64
                + win[[2, 1]] as f64
                + win[[1, 0]] as f64
                + win[[1, 2]] as f64;
            (sum + lap, sum_sq + lap * lap)
        });

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}
