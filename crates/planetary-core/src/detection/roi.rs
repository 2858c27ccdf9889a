use ndarray::Array2;
use tracing::debug;

use crate::consts::{MAX_ROI_SHIFT_FRACTION, MIN_SUBJECT_AREA, ROI_PADDING_FRACTION, ROI_SMOOTHING};
use crate::frame::Roi;
use crate::sharpen::wavelet::b3_smooth;

use super::components::connected_components;
use super::threshold::otsu_threshold;

/// Locate the imaged subject in a luminance plane.
///
/// Pipeline: B3 smoothing -> Otsu threshold -> connected components ->
/// largest blob -> padded bounding box.
///
/// Returns `None` for a featureless plane or when no blob reaches
/// [`MIN_SUBJECT_AREA`].
pub fn detect_subject(luminance: &Array2<f32>) -> Option<Roi> {
    let (h, w) = luminance.dim();
    if h == 0 || w == 0 {
        return None;
    }

    let smoothed = b3_smooth(luminance, 0);
    let threshold = otsu_threshold(smoothed.view())?;
    let mask = smoothed.mapv(|v| v >= threshold);

    let blobs = connected_components(&mask);
    let largest = blobs.first()?;
    if largest.area < MIN_SUBJECT_AREA {
        return None;
    }

    Some(pad_roi(&largest.bbox, w, h))
}

fn pad_roi(bbox: &Roi, width: usize, height: usize) -> Roi {
    let pad_x = (bbox.width as f32 * ROI_PADDING_FRACTION).ceil() as usize;
    let pad_y = (bbox.height as f32 * ROI_PADDING_FRACTION).ceil() as usize;
    let x = bbox.x.saturating_sub(pad_x);
    let y = bbox.y.saturating_sub(pad_y);
    let right = (bbox.x + bbox.width + pad_x).min(width);
    let bottom = (bbox.y + bbox.height + pad_y).min(height);
    Roi {
        x,
        y,
        width: right - x,
        height: bottom - y,
    }
}

/// Keeps the ROI continuous across sampled frames.
///
/// Detections whose centre jumps further than the allowed motion for the
/// frame gap are treated as glitches and replaced by the previous ROI.
/// Accepted detections are blended with the previous ROI.
#[derive(Clone, Debug)]
pub struct RoiTracker {
    width: usize,
    height: usize,
    previous: Option<(usize, Roi)>,
}

impl RoiTracker {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            previous: None,
        }
    }

    /// Feed the detection for `frame_index` (frames must arrive in increasing
    /// index order) and get the ROI to score it with.
    pub fn update(&mut self, frame_index: usize, detected: Option<Roi>) -> Roi {
        let roi = match (self.previous, detected) {
            (None, Some(roi)) => roi,
            (None, None) => Roi::full(self.width, self.height),
            (Some((_, prev)), None) => prev,
            (Some((prev_index, prev)), Some(roi)) => {
                let gap = frame_index.saturating_sub(prev_index).max(1) as f64;
                let max_shift =
                    MAX_ROI_SHIFT_FRACTION * self.width.max(self.height) as f64 * gap;
                let (px, py) = prev.center();
                let (cx, cy) = roi.center();
                let shift = ((cx - px).powi(2) + (cy - py).powi(2)).sqrt();
                if shift > max_shift {
                    debug!(
                        frame_index,
                        shift,
                        max_shift,
                        "ROI jump rejected, keeping previous"
                    );
                    prev
                } else {
                    blend(&prev, &roi)
                }
            }
        };
        let roi = roi.clamp_to(self.width, self.height);
        self.previous = Some((frame_index, roi));
        roi
    }
}

fn blend(prev: &Roi, next: &Roi) -> Roi {
    let mix = |a: usize, b: usize| -> usize {
        (a as f64 * (1.0 - ROI_SMOOTHING) + b as f64 * ROI_SMOOTHING).round() as usize
    };
    Roi {
        x: mix(prev.x, next.x),
        y: mix(prev.y, next.y),
        width: mix(prev.width, next.width),
        height: mix(prev.height, next.height),
    }
}
