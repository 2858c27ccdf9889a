use ndarray::ArrayView2;

use crate::consts::OTSU_HISTOGRAM_BINS;

/// Compute mean and standard deviation of pixel values.
pub fn compute_mean_stddev(data: ArrayView2<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let sum: f64 = data.iter().map(|&v| v as f64).sum();
    let mean = sum / n;
    let var: f64 = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Otsu's thresholding over the data's own intensity range.
///
/// The histogram spans `[min, max]` of the input so that dim targets still
/// get the full bin resolution. Pixels `>= threshold` are foreground. A flat
/// image has no threshold.
pub fn otsu_threshold(data: ArrayView2<f32>) -> Option<f32> {
    let (lo, hi) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if hi <= lo {
        return None;
    }

    let bins = OTSU_HISTOGRAM_BINS;
    let span = hi - lo;
    let mut histogram = vec![0u64; bins];
    for &v in data.iter().filter(|v| v.is_finite()) {
        let bin = (((v - lo) / span) * (bins - 1) as f32) as usize;
        histogram[bin.min(bins - 1)] += 1;
    }

    let total: f64 = histogram.iter().sum::<u64>() as f64;
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut weight_bg = 0.0_f64;
    let mut sum_bg = 0.0_f64;
    let mut best_variance = 0.0_f64;
    let mut best_bin = 0usize;

    for (i, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between > best_variance {
            best_variance = between;
            best_bin = i;
        }
    }

    Some(lo + (best_bin + 1) as f32 / (bins - 1) as f32 * span)
}
