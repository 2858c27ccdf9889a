use ndarray::{s, Array2};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::consts::ANALYSIS_BATCH_SIZE;
use crate::detection::{detect_subject, RoiTracker};
use crate::error::{Result, StackerError};
use crate::frame::{AnalysisResult, FrameScore, Roi};
use crate::pipeline::config::QualityMetric;
use crate::pipeline::{CancellationToken, PipelineStage, ProgressReporter};
use crate::source::FrameSource;

use super::score_with_metric;

/// A decoded sample waiting for its ROI.
struct Sampled {
    index: usize,
    luminance: Array2<f32>,
    detected: Option<Roi>,
}

/// Score every `sample_step`-th frame of `source`.
///
/// Frames are handled in batches of [`ANALYSIS_BATCH_SIZE`]: each batch is
/// decoded and searched for the subject in parallel, its ROIs are tracked
/// sequentially in frame order, sharpness is measured in parallel, and the
/// batch is dropped before the next one is decoded.
///
/// Frames that fail to decode are skipped and counted in
/// [`AnalysisResult::skipped`].
pub fn analyze_sampled(
    source: &dyn FrameSource,
    sample_step: usize,
    metric: QualityMetric,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<AnalysisResult> {
    if sample_step == 0 {
        return Err(StackerError::InvalidInput(
            "sample_step must be at least 1".into(),
        ));
    }
    let total = source.total_frames();
    let sampled: Vec<usize> = (0..total).step_by(sample_step).collect();

    let mut tracker: Option<RoiTracker> = None;
    let mut frame_dim: Option<(usize, usize)> = None;
    let mut raw: Vec<(usize, f64, Roi)> = Vec::with_capacity(sampled.len());
    let mut skipped = 0usize;
    let mut done = 0usize;

    for batch in sampled.chunks(ANALYSIS_BATCH_SIZE) {
        cancel.check()?;

        let decoded: Vec<(usize, Result<Sampled>)> = batch
            .par_iter()
            .map(|&index| {
                if cancel.is_cancelled() {
                    return (index, Err(StackerError::Cancelled));
                }
                let sample = source.decode(index).map(|frame| {
                    let luminance = frame.luminance();
                    let detected = detect_subject(&luminance);
                    Sampled {
                        index,
                        luminance,
                        detected,
                    }
                });
                (index, sample)
            })
            .collect();

        let mut tracked: Vec<(Sampled, Roi)> = Vec::with_capacity(decoded.len());
        for (index, sample) in decoded {
            let sample = match sample {
                Err(StackerError::Cancelled) => return Err(StackerError::Cancelled),
                Err(e) => {
                    warn!(frame = index, error = %e, "Skipping frame that failed to decode");
                    skipped += 1;
                    continue;
                }
                Ok(sample) => sample,
            };

            let dim = sample.luminance.dim();
            if *frame_dim.get_or_insert(dim) != dim {
                warn!(
                    frame = index,
                    width = dim.1,
                    height = dim.0,
                    "Skipping frame with mismatched dimensions"
                );
                skipped += 1;
                continue;
            }

            let tracker = tracker.get_or_insert_with(|| RoiTracker::new(dim.1, dim.0));
            let roi = tracker.update(sample.index, sample.detected);
            tracked.push((sample, roi));
        }

        let batch_scores: Vec<(usize, f64, Roi)> = tracked
            .par_iter()
            .map(|(sample, roi)| {
                let region = sample.luminance.slice(s![
                    roi.y..roi.y + roi.height,
                    roi.x..roi.x + roi.width
                ]);
                (sample.index, score_with_metric(region, metric), *roi)
            })
            .collect();
        raw.extend(batch_scores);

        done += batch.len();
        reporter.advance(PipelineStage::Analyze, done, sampled.len());
    }

    let scores = normalize_and_rank(raw);
    info!(
        total_frames = total,
        analyzed = scores.len(),
        skipped,
        metric = %metric,
        "Quality analysis complete"
    );

    Ok(AnalysisResult {
        total_frames: total,
        sample_step,
        skipped,
        scores,
    })
}

/// Map raw sharpness values onto [0, 1] by their min/max and sort best first,
/// ties by ascending frame index. If every value is equal, all score 1.0.
/// A non-finite value scores 0.0 and takes no part in the min/max.
pub fn normalize_and_rank(raw: Vec<(usize, f64, Roi)>) -> Vec<FrameScore> {
    let (min, max) = raw
        .iter()
        .filter(|(_, s, _)| s.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, s, _)| {
            (lo.min(s), hi.max(s))
        });
    let span = max - min;

    let mut scores: Vec<FrameScore> = raw
        .into_iter()
        .map(|(frame_index, s, roi)| {
            let quality_score = if !s.is_finite() {
                warn!(frame = frame_index, raw = s, "Sharpness is not finite, scoring 0");
                0.0
            } else if span > f64::EPSILON * max.abs().max(1.0) {
                ((s - min) / span).clamp(0.0, 1.0)
            } else {
                1.0
            };
            FrameScore {
                frame_index,
                quality_score,
                roi,
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.quality_score
            .total_cmp(&a.quality_score)
            .then(a.frame_index.cmp(&b.frame_index))
    });
    scores
}
