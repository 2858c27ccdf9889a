pub mod analyzer;
pub mod gradient;
pub mod laplacian;

use ndarray::ArrayView2;

use crate::pipeline::config::QualityMetric;

pub use analyzer::analyze_sampled;

/// Score a region using the specified quality metric.
pub fn score_with_metric(data: ArrayView2<f32>, metric: QualityMetric) -> f64 {
    match metric {
        QualityMetric::Laplacian => laplacian::laplacian_variance(data),
        QualityMetric::Gradient => gradient::gradient_score(data),
    }
}
