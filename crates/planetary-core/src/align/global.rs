use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, Zip};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::consts::{
    MIN_GLOBAL_CONFIDENCE, ROTATION_MIN_IMPROVEMENT, ROTATION_RESIDUAL_TOLERANCE,
};
use crate::error::{Result, StackerError};
use crate::frame::{AlignmentTransform, GlobalTransform};
use crate::pipeline::{CancellationToken, PipelineStage, ProgressReporter};
use crate::source::FrameSource;

use super::phase_correlation::PhaseCorrelator;
use super::rotation::RotationEstimator;
use super::warp::Warp;

/// What happened to the rotation/scale refinement of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refinement {
    /// Translation alone was within tolerance.
    NotAttempted,
    /// Estimated, but out of range or not enough of an improvement.
    Rejected,
    Accepted,
}

/// Global transform of one frame with the figures it was judged by.
#[derive(Clone, Copy, Debug)]
pub struct GlobalEstimate {
    pub transform: GlobalTransform,
    pub confidence: f64,
    /// Normalized residual of `transform` (infinite for an unconfident
    /// translation).
    pub residual: f64,
    pub refinement: Refinement,
}

/// Whole-frame aligner against a fixed reference luminance plane.
///
/// Holds the reference spectra (translation and log-polar) so that every
/// worker shares them read-only.
pub struct GlobalAligner {
    reference: Array2<f32>,
    correlator: PhaseCorrelator,
    rotation: RotationEstimator,
}

impl GlobalAligner {
    pub fn new(reference: Array2<f32>) -> Self {
        let correlator = PhaseCorrelator::new(reference.view());
        let rotation = RotationEstimator::new(reference.view());
        Self {
            reference,
            correlator,
            rotation,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.reference.dim()
    }

    /// Reference luminance plane.
    pub fn reference(&self) -> &Array2<f32> {
        &self.reference
    }

    /// Estimate the transform of frame `index` (luminance `target`).
    pub fn align(&self, index: usize, target: &Array2<f32>) -> Result<GlobalTransform> {
        self.estimate(index, target).map(|e| e.transform)
    }

    /// Full estimate for frame `index`, including how the rotation/scale
    /// refinement went.
    ///
    /// Translation comes from phase correlation. Rotation and scale are only
    /// estimated when the translation alone leaves a residual above
    /// [`ROTATION_RESIDUAL_TOLERANCE`], and only kept when they cut it by
    /// [`ROTATION_MIN_IMPROVEMENT`]. A final confidence below
    /// [`MIN_GLOBAL_CONFIDENCE`] is an `AlignmentFailure`.
    pub fn estimate(&self, index: usize, target: &Array2<f32>) -> Result<GlobalEstimate> {
        if target.dim() != self.dim() {
            return Err(StackerError::DecodeFailure {
                index,
                reason: format!(
                    "frame is {}x{}, reference is {}x{}",
                    target.ncols(),
                    target.nrows(),
                    self.reference.ncols(),
                    self.reference.nrows()
                ),
            });
        }

        let shift = self.correlator.correlate(target.view())?;
        let mut estimate = GlobalEstimate {
            transform: GlobalTransform::translation(shift.dx, shift.dy),
            confidence: shift.confidence,
            residual: f64::INFINITY,
            refinement: Refinement::NotAttempted,
        };
        if estimate.confidence >= MIN_GLOBAL_CONFIDENCE {
            estimate.residual = self.residual(target, &estimate.transform);
        }

        if estimate.residual > ROTATION_RESIDUAL_TOLERANCE {
            estimate.refinement = Refinement::Rejected;
            if let Some((rotation, scale)) = self.rotation.estimate(target.view())? {
                let derotated = Warp::global(
                    GlobalTransform {
                        dx: 0.0,
                        dy: 0.0,
                        rotation,
                        scale,
                    },
                    target.nrows(),
                    target.ncols(),
                )
                .apply(target);
                let shift = self.correlator.correlate(derotated.view())?;
                let candidate = GlobalTransform {
                    dx: shift.dx,
                    dy: shift.dy,
                    rotation,
                    scale,
                };
                let candidate_residual = self.residual(target, &candidate);
                if shift.confidence >= MIN_GLOBAL_CONFIDENCE
                    && candidate_residual < estimate.residual * ROTATION_MIN_IMPROVEMENT
                {
                    debug!(
                        frame = index,
                        rotation,
                        scale,
                        residual = candidate_residual,
                        "Rotation refinement accepted"
                    );
                    estimate = GlobalEstimate {
                        transform: candidate,
                        confidence: shift.confidence,
                        residual: candidate_residual,
                        refinement: Refinement::Accepted,
                    };
                }
            }
        }

        if estimate.confidence < MIN_GLOBAL_CONFIDENCE {
            return Err(StackerError::AlignmentFailure {
                index,
                confidence: estimate.confidence,
                required: MIN_GLOBAL_CONFIDENCE,
            });
        }

        debug!(
            frame = index,
            dx = estimate.transform.dx,
            dy = estimate.transform.dy,
            confidence = estimate.confidence,
            residual = estimate.residual,
            "Global alignment"
        );
        Ok(estimate)
    }

    /// RMS difference between the reference and the warped target, relative
    /// to the reference's RMS deviation over the same (valid) pixels.
    fn residual(&self, target: &Array2<f32>, transform: &GlobalTransform) -> f64 {
        let (h, w) = self.dim();
        let warped = Warp::global(*transform, h, w).apply(target);
        normalized_residual(&self.reference, &warped)
    }
}

/// RMS of `reference - warped` over the pixels where `warped` is finite,
/// divided by the RMS deviation of `reference` from its mean over those pixels.
pub fn normalized_residual(reference: &Array2<f32>, warped: &Array2<f32>) -> f64 {
    let (mut n, mut sum, mut sum_sq, mut diff_sq) = (0usize, 0.0f64, 0.0f64, 0.0f64);
    Zip::from(reference).and(warped).for_each(|&r, &t| {
        if t.is_finite() {
            let r = r as f64;
            n += 1;
            sum += r;
            sum_sq += r * r;
            diff_sq += (r - t as f64).powi(2);
        }
    });
    if n == 0 {
        return f64::INFINITY;
    }
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    if variance <= f64::EPSILON {
        return 0.0;
    }
    (diff_sq / n as f64 / variance).sqrt()
}

/// Result of aligning a selection against its reference.
#[derive(Clone, Debug, Default)]
pub struct GlobalAlignment {
    /// Transforms of the usable frames, in selection order.
    pub transforms: Vec<AlignmentTransform>,
    /// Frames excluded for low confidence or failed decoding.
    pub excluded: usize,
}

/// Align the frames `indices` (reference excluded) in parallel.
///
/// The reference frame itself gets the identity transform and is placed
/// first. Recoverable per-frame failures are logged and counted; any other
/// error aborts the stage.
pub fn align_global(
    source: &dyn FrameSource,
    aligner: &GlobalAligner,
    reference_index: usize,
    indices: &[usize],
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<GlobalAlignment> {
    let counter = AtomicUsize::new(0);
    let total = indices.len();

    let results: Vec<(usize, Result<GlobalTransform>)> = indices
        .par_iter()
        .map(|&index| {
            let result = cancel.check().and_then(|_| {
                let frame = source.decode(index)?;
                aligner.align(index, &frame.luminance())
            });
            let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.advance(PipelineStage::GlobalAlign, done, total);
            (index, result)
        })
        .collect();

    let mut alignment = GlobalAlignment {
        transforms: Vec::with_capacity(total + 1),
        excluded: 0,
    };
    alignment.transforms.push(AlignmentTransform {
        frame_index: reference_index,
        ..Default::default()
    });

    for (index, result) in results {
        match result {
            Ok(global) => alignment.transforms.push(AlignmentTransform {
                frame_index: index,
                global,
                local: None,
            }),
            Err(e) if e.is_recoverable() => {
                warn!(frame = index, error = %e, "Excluding frame from stack");
                alignment.excluded += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        aligned = alignment.transforms.len(),
        excluded = alignment.excluded,
        "Global alignment complete"
    );
    Ok(alignment)
}
