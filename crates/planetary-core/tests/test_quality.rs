#[allow(dead_code)]
mod common;

use std::collections::HashSet;

use ndarray::Array2;

use planetary_core::detection::components::connected_components;
use planetary_core::detection::threshold::otsu_threshold;
use planetary_core::detection::{detect_subject, RoiTracker};
use planetary_core::error::ErrorKind;
use planetary_core::frame::Roi;
use planetary_core::pipeline::analyze_frames;
use planetary_core::quality::analyzer::normalize_and_rank;
use planetary_core::quality::gradient::gradient_score;
use planetary_core::quality::laplacian::laplacian_variance;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
fn test_laplacian_flat_is_zero() {
    let flat = Array2::<f32>::from_elem((16, 16), 0.4);
    assert_eq!(laplacian_variance(flat.view()), 0.0);
    assert_eq!(gradient_score(flat.view()), 0.0);
}

#[test]
fn test_metrics_prefer_sharp_frames() {
    let sharp = common::shifted_planet(64, 64, 0.0, 0.0);
    let blurred = common::box_blur(&sharp, 4);

    let lap_sharp = laplacian_variance(sharp.view());
    let lap_blur = laplacian_variance(blurred.view());
    assert!(
        lap_sharp > lap_blur,
        "Laplacian variance should drop with blur: sharp={lap_sharp}, blurred={lap_blur}"
    );

    let grad_sharp = gradient_score(sharp.view());
    let grad_blur = gradient_score(blurred.view());
    assert!(
        grad_sharp > grad_blur,
        "Gradient score should drop with blur: sharp={grad_sharp}, blurred={grad_blur}"
    );
}

#[test]
fn test_metrics_tiny_region() {
    let tiny = Array2::<f32>::from_elem((2, 5), 1.0);
    assert_eq!(laplacian_variance(tiny.view()), 0.0);
    assert_eq!(gradient_score(tiny.view()), 0.0);
}

// ---------------------------------------------------------------------------
// Subject detection and tracking
// ---------------------------------------------------------------------------

#[test]
fn test_otsu_splits_bimodal_data() {
    let data = Array2::from_shape_fn((10, 10), |(r, _)| if r < 6 { 0.1f32 } else { 0.8 });
    let t = otsu_threshold(data.view()).unwrap();
    assert!(t > 0.1 && t <= 0.8, "threshold = {t}");
    assert_eq!(data.iter().filter(|&&v| v >= t).count(), 40);

    assert!(otsu_threshold(Array2::<f32>::from_elem((4, 4), 0.5).view()).is_none());
}

#[test]
fn test_connected_components_largest_first() {
    let mut mask = Array2::from_elem((8, 8), false);
    mask[[0, 0]] = true;
    for r in 3..6 {
        for c in 2..7 {
            mask[[r, c]] = true;
        }
    }
    let blobs = connected_components(&mask);
    assert_eq!(blobs.len(), 2);
    assert_eq!(blobs[0].area, 15);
    assert_eq!(
        blobs[0].bbox,
        Roi {
            x: 2,
            y: 3,
            width: 5,
            height: 3
        }
    );
    assert_eq!(blobs[1].area, 1);
}

#[test]
fn test_detect_subject_finds_disc() {
    let frame = common::shifted_planet(96, 96, 10.0, -6.0);
    let roi = detect_subject(&frame).expect("disc should be detected");

    // Disc radius is ~30.7 px around (57.5, 41.5).
    let (cx, cy) = roi.center();
    assert!((cx - 57.5).abs() < 3.0, "ROI centre x = {cx}");
    assert!((cy - 41.5).abs() < 3.0, "ROI centre y = {cy}");
    assert!(roi.width >= 55 && roi.width <= 80, "ROI width = {}", roi.width);
    assert!(roi.x + roi.width <= 96 && roi.y + roi.height <= 96);
}

#[test]
fn test_detect_subject_flat_frame() {
    let flat = Array2::<f32>::from_elem((32, 32), 0.3);
    assert!(detect_subject(&flat).is_none());
}

#[test]
fn test_roi_tracker_first_frame_without_detection_uses_full_frame() {
    let mut tracker = RoiTracker::new(100, 80);
    assert_eq!(tracker.update(0, None), Roi::full(100, 80));
}

#[test]
fn test_roi_tracker_rejects_jumps() {
    let mut tracker = RoiTracker::new(200, 200);
    let start = Roi {
        x: 50,
        y: 50,
        width: 40,
        height: 40,
    };
    assert_eq!(tracker.update(0, Some(start)), start);

    // 5% of 200 px = 10 px allowed per frame; this jumps 100 px.
    let far = Roi {
        x: 150,
        y: 50,
        width: 40,
        height: 40,
    };
    assert_eq!(tracker.update(1, Some(far)), start);

    // A small move is blended halfway.
    let near = Roi {
        x: 54,
        y: 50,
        width: 40,
        height: 40,
    };
    let blended = tracker.update(2, Some(near));
    assert_eq!(blended.x, 52);
    assert_eq!(blended.width, 40);

    // No detection keeps the previous ROI.
    assert_eq!(tracker.update(3, None), blended);
}

#[test]
fn test_roi_tracker_allowance_grows_with_gap() {
    let mut tracker = RoiTracker::new(200, 200);
    let start = Roi {
        x: 50,
        y: 50,
        width: 40,
        height: 40,
    };
    tracker.update(0, Some(start));
    // 30 px over a gap of 5 frames is within 5 * 10 px.
    let moved = Roi {
        x: 80,
        y: 50,
        width: 40,
        height: 40,
    };
    let roi = tracker.update(5, Some(moved));
    assert_eq!(roi.x, 65);
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[test]
fn test_normalize_and_rank_order() {
    let roi = Roi::full(8, 8);
    let scores = normalize_and_rank(vec![(0, 2.0, roi), (1, 4.0, roi), (2, 2.0, roi), (3, 1.0, roi)]);
    let order: Vec<usize> = scores.iter().map(|s| s.frame_index).collect();
    assert_eq!(order, vec![1, 0, 2, 3]);
    assert_eq!(scores[0].quality_score, 1.0);
    assert_eq!(scores[3].quality_score, 0.0);
    assert!((scores[1].quality_score - 1.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_normalize_non_finite_scores_zero() {
    let roi = Roi::full(8, 8);
    let scores = normalize_and_rank(vec![
        (0, 1.0, roi),
        (1, f64::NAN, roi),
        (2, 2.0, roi),
        (3, f64::INFINITY, roi),
    ]);
    let order: Vec<usize> = scores.iter().map(|s| s.frame_index).collect();
    assert_eq!(order, vec![2, 0, 1, 3]);
    assert_eq!(scores[0].quality_score, 1.0);
    assert!(scores[1..].iter().all(|s| s.quality_score == 0.0));
}

#[test]
fn test_analysis_frame_with_nan_pixels_ranks_low() {
    let mut planes: Vec<_> = (0..6)
        .map(|i| {
            let (dx, dy) = common::jitter(i);
            common::shifted_planet(48, 48, dx, dy)
        })
        .collect();
    planes[2][[24, 24]] = f32::NAN;
    let source = common::mono_source(planes);

    let result = analyze_frames(&source, 1).unwrap();
    assert_eq!(result.scores.len(), 6);
    assert!(result
        .scores
        .iter()
        .all(|s| (0.0..=1.0).contains(&s.quality_score)));
    assert_ne!(result.scores[0].frame_index, 2);
    let damaged = result.scores.iter().find(|s| s.frame_index == 2).unwrap();
    assert_eq!(damaged.quality_score, 0.0);
}

#[test]
fn test_normalize_all_equal_scores_one() {
    let roi = Roi::full(8, 8);
    let scores = normalize_and_rank(vec![(2, 0.5, roi), (0, 0.5, roi), (1, 0.5, roi)]);
    assert!(scores.iter().all(|s| s.quality_score == 1.0));
    let order: Vec<usize> = scores.iter().map(|s| s.frame_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn test_analysis_sample_count() {
    let planes: Vec<_> = (0..20)
        .map(|i| {
            let (dx, dy) = common::jitter(i);
            common::shifted_planet(48, 48, dx, dy)
        })
        .collect();
    let source = common::mono_source(planes);

    for step in [1usize, 2, 3, 7, 20, 25] {
        let result = analyze_frames(&source, step).unwrap();
        assert_eq!(result.total_frames, 20);
        assert_eq!(result.sample_step, step);
        assert_eq!(
            result.scores.len(),
            20usize.div_ceil(step),
            "step {step} analyzed the wrong number of frames"
        );
        assert!(result
            .scores
            .iter()
            .all(|s| s.frame_index % step == 0 && (0.0..=1.0).contains(&s.quality_score)));
        for pair in result.scores.windows(2) {
            assert!(
                pair[0].quality_score > pair[1].quality_score
                    || (pair[0].quality_score == pair[1].quality_score
                        && pair[0].frame_index < pair[1].frame_index),
                "scores out of order: {:?} then {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn test_analysis_ranks_blurred_last() {
    let sharp = common::shifted_planet(64, 64, 0.0, 0.0);
    let planes = vec![
        common::box_blur(&sharp, 3),
        sharp.clone(),
        common::box_blur(&sharp, 1),
        common::box_blur(&sharp, 6),
    ];
    let result = analyze_frames(&common::mono_source(planes), 1).unwrap();
    let order: Vec<usize> = result.scores.iter().map(|s| s.frame_index).collect();
    assert_eq!(order, vec![1, 2, 0, 3]);
    assert_eq!(result.scores[0].quality_score, 1.0);
    assert_eq!(result.scores[3].quality_score, 0.0);
}

#[test]
fn test_analysis_skips_decode_failures() {
    let planes: Vec<_> = (0..12)
        .map(|_| common::shifted_planet(32, 32, 0.0, 0.0))
        .collect();
    let source = common::FlakySource {
        inner: common::mono_source(planes),
        failing: HashSet::from([3, 8]),
    };

    let result = analyze_frames(&source, 1).unwrap();
    assert_eq!(result.total_frames, 12);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.scores.len(), 10);
    assert!(result.scores.iter().all(|s| s.frame_index != 3 && s.frame_index != 8));

    // Only sampled frames can fail: with step 2, index 3 is never decoded.
    let result = analyze_frames(&source, 2).unwrap();
    assert_eq!(result.skipped, 1);
    assert_eq!(result.scores.len(), 5);
}

#[test]
fn test_analysis_rejects_zero_step() {
    let source = common::mono_source(vec![Array2::zeros((8, 8))]);
    let err = analyze_frames(&source, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_analysis_empty_source() {
    let source = common::mono_source(vec![]);
    let err = analyze_frames(&source, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
