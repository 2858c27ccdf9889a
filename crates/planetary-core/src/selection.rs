use tracing::{info, warn};

use crate::consts::KEEP_ROUNDING_SLACK;
use crate::frame::AnalysisResult;
use crate::pipeline::config::ProcessingParams;

/// Frames chosen for stacking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Frame indices, best quality first.
    pub indices: Vec<usize>,
    /// Fewer frames were analyzed than `min_frames` asks for, so every
    /// analyzed frame was taken.
    pub below_minimum: bool,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Number of frames to keep out of `total`:
/// `clamp(round(total * keep), min_frames, max_frames)`.
pub fn target_count(total: usize, params: &ProcessingParams) -> usize {
    // Decimal fractions are inexact in binary: 5 * 0.7 is 3.4999999999999996.
    let wanted = (total as f64 * params.keep_percentage + KEEP_ROUNDING_SLACK).round() as usize;
    wanted.clamp(params.min_frames, params.max_frames)
}

/// Pick the top-scoring frames from an analysis.
///
/// The count is based on the video's total frame count, then capped by the
/// number of frames that were actually scored. The result keeps the
/// analysis order (descending quality, ties by ascending index), so the
/// first entry is the best frame.
pub fn select_frames(analysis: &AnalysisResult, params: &ProcessingParams) -> Selection {
    let available = analysis.scores.len();
    let below_minimum = available < params.min_frames;
    if below_minimum {
        warn!(
            available,
            min_frames = params.min_frames,
            "Fewer analyzed frames than min_frames, selecting all of them"
        );
    }

    let count = target_count(analysis.total_frames, params).min(available);
    let indices: Vec<usize> = analysis
        .scores
        .iter()
        .take(count)
        .map(|s| s.frame_index)
        .collect();

    info!(
        selected = indices.len(),
        total = analysis.total_frames,
        analyzed = available,
        "Selected best frames"
    );

    Selection {
        indices,
        below_minimum,
    }
}
