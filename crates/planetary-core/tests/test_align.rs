#[allow(dead_code)]
mod common;

use std::collections::HashSet;

use ndarray::{array, Array2};

use planetary_core::align::global::normalized_residual;
use planetary_core::align::rotation::RotationEstimator;
use planetary_core::align::{
    align_global, bilinear_sample, warp_plane, GlobalAligner, PhaseCorrelator, Refinement, Warp,
};
use planetary_core::consts::ROTATION_RESIDUAL_TOLERANCE;
use planetary_core::error::ErrorKind;
use planetary_core::frame::{AlignmentTransform, GlobalTransform};
use planetary_core::pipeline::{CancellationToken, NoOpSink, ProgressReporter};

// ---------------------------------------------------------------------------
// Phase correlation
// ---------------------------------------------------------------------------

#[test]
fn test_phase_correlation_integer_shift() {
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let target = common::shifted_planet(64, 64, 5.0, -3.0);
    let correlator = PhaseCorrelator::new(reference.view());
    let c = correlator.correlate(target.view()).unwrap();
    assert!(
        (c.dx - 5.0).abs() < 0.5 && (c.dy + 3.0).abs() < 0.5,
        "expected (5, -3), got ({}, {})",
        c.dx,
        c.dy
    );
    assert!(c.confidence > 8.0, "confidence = {}", c.confidence);
}

#[test]
fn test_phase_correlation_size_mismatch() {
    let reference = common::shifted_planet(32, 32, 0.0, 0.0);
    let correlator = PhaseCorrelator::new(reference.view());
    let target = Array2::<f32>::zeros((32, 16));
    let err = correlator.correlate(target.view()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

// ---------------------------------------------------------------------------
// Global alignment
// ---------------------------------------------------------------------------

#[test]
fn test_global_identity() {
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let aligner = GlobalAligner::new(reference.clone());
    let t = aligner.align(0, &reference).unwrap();
    assert!(t.dx.abs() < 1e-3 && t.dy.abs() < 1e-3, "got ({}, {})", t.dx, t.dy);
    assert_eq!(t.rotation, 0.0);
    assert_eq!(t.scale, 1.0);
}

#[test]
fn test_global_integer_shift() {
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let target = common::shifted_planet(64, 64, 5.0, -3.0);
    let aligner = GlobalAligner::new(reference);
    let t = aligner.align(1, &target).unwrap();
    assert!(
        (t.dx - 5.0).abs() < 0.5 && (t.dy + 3.0).abs() < 0.5,
        "expected (5, -3), got ({}, {})",
        t.dx,
        t.dy
    );
    assert!(t.rotation.abs() < 0.02, "spurious rotation {}", t.rotation);
    assert!((t.scale - 1.0).abs() < 0.03, "spurious scale {}", t.scale);
}

#[test]
fn test_global_subpixel_shift() {
    let reference = common::shifted_planet(96, 96, 0.0, 0.0);
    let target = common::shifted_planet(96, 96, 2.4, -1.7);
    let aligner = GlobalAligner::new(reference);
    let t = aligner.align(1, &target).unwrap();
    assert!(
        (t.dx - 2.4).abs() < 0.5 && (t.dy + 1.7).abs() < 0.5,
        "expected (2.4, -1.7), got ({}, {})",
        t.dx,
        t.dy
    );
}

#[test]
fn test_global_rotation() {
    let angle = 3.0f64.to_radians();
    let reference = common::rotated_planet(128, 128, 0.0);
    let target = common::rotated_planet(128, 128, angle);
    let aligner = GlobalAligner::new(reference.clone());
    let estimate = aligner.estimate(1, &target).unwrap();
    let t = estimate.transform;

    assert_eq!(estimate.refinement, Refinement::Accepted);
    assert!(
        (t.rotation - angle).abs() < 1.0f64.to_radians(),
        "expected rotation {angle}, got {}",
        t.rotation
    );
    assert!(t.dx.abs() < 1.0 && t.dy.abs() < 1.0, "got ({}, {})", t.dx, t.dy);
    assert!((t.scale - 1.0).abs() < 0.03, "scale = {}", t.scale);

    // The accepted transform brings the frame back onto the reference.
    let warped = Warp::global(t, 128, 128).apply(&target);
    let aligned = normalized_residual(&reference, &warped);
    let unaligned = normalized_residual(&reference, &target);
    assert!(
        aligned < unaligned,
        "residual should drop: aligned={aligned}, unaligned={unaligned}"
    );
    assert!((estimate.residual - aligned).abs() < 1e-9);
}

#[test]
fn test_global_integer_shift_skips_refinement() {
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let target = common::shifted_planet(64, 64, 5.0, -3.0);
    let aligner = GlobalAligner::new(reference);
    let estimate = aligner.estimate(1, &target).unwrap();

    assert_eq!(estimate.refinement, Refinement::NotAttempted);
    assert!(
        estimate.residual <= ROTATION_RESIDUAL_TOLERANCE,
        "residual = {}",
        estimate.residual
    );
    assert!(estimate.transform.is_translation_only());
}

#[test]
fn test_global_unexplained_change_rejects_refinement() {
    // A new bright spot leaves a residual that no rotation can remove.
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let mut target = reference.clone();
    for ((r, c), v) in target.indexed_iter_mut() {
        let d2 = (r as f64 - 20.0).powi(2) + (c as f64 - 40.0).powi(2);
        *v += (0.3 * (-d2 / (2.0 * 2.5 * 2.5)).exp()) as f32;
    }
    let aligner = GlobalAligner::new(reference);
    let estimate = aligner.estimate(1, &target).unwrap();

    assert!(
        estimate.residual > ROTATION_RESIDUAL_TOLERANCE,
        "residual = {}",
        estimate.residual
    );
    assert_eq!(estimate.refinement, Refinement::Rejected);
    assert_eq!(estimate.transform.rotation, 0.0);
    assert_eq!(estimate.transform.scale, 1.0);
    assert!(estimate.transform.dx.abs() < 0.5 && estimate.transform.dy.abs() < 0.5);
}

#[test]
fn test_rotation_estimator_recovers_angle() {
    let reference = common::rotated_planet(128, 128, 0.0);
    let estimator = RotationEstimator::new(reference.view());

    for degrees in [8.0f64, -5.0] {
        let target = common::rotated_planet(128, 128, degrees.to_radians());
        let (rotation, scale) = estimator
            .estimate(target.view())
            .unwrap()
            .unwrap_or_else(|| panic!("no estimate for {degrees} degrees"));
        assert!(
            (rotation.to_degrees() - degrees).abs() < 0.5,
            "expected {degrees} degrees, got {}",
            rotation.to_degrees()
        );
        assert!((scale - 1.0).abs() < 0.02, "scale = {scale}");
    }
}

#[test]
fn test_rotation_estimator_ignores_translation() {
    let reference = common::rotated_planet(128, 128, 0.0);
    let estimator = RotationEstimator::new(reference.view());
    let target = common::shifted_planet(128, 128, 2.4, -1.7);
    let (rotation, scale) = estimator.estimate(target.view()).unwrap().unwrap();
    assert!(rotation.to_degrees().abs() < 0.25, "rotation = {rotation}");
    assert!((scale - 1.0).abs() < 0.02, "scale = {scale}");
}

#[test]
fn test_global_flat_frame_fails() {
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let aligner = GlobalAligner::new(reference);
    let err = aligner.align(7, &Array2::zeros((64, 64))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlignmentFailure);
    assert!(err.is_recoverable());
}

#[test]
fn test_global_dimension_mismatch() {
    let reference = common::shifted_planet(64, 64, 0.0, 0.0);
    let aligner = GlobalAligner::new(reference);
    let err = aligner
        .align(3, &common::shifted_planet(48, 64, 0.0, 0.0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeFailure);
}

#[test]
fn test_align_global_excludes_bad_frames() {
    let mut planes: Vec<Array2<f32>> = (0..4)
        .map(|i| {
            let (dx, dy) = common::jitter(i);
            common::shifted_planet(64, 64, dx, dy)
        })
        .collect();
    planes[2] = Array2::zeros((64, 64));
    let source = common::FlakySource {
        inner: common::mono_source(planes),
        failing: HashSet::from([3]),
    };

    let reference = common::shifted_planet(64, 64, common::jitter(0).0, common::jitter(0).1);
    let aligner = GlobalAligner::new(reference);
    let sink = NoOpSink;
    let reporter = ProgressReporter::new(&sink);
    let result = align_global(
        &source,
        &aligner,
        0,
        &[1, 2, 3],
        &reporter,
        &CancellationToken::new(),
    )
    .unwrap();

    let indices: Vec<usize> = result.transforms.iter().map(|t| t.frame_index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(result.excluded, 2);
    assert_eq!(result.transforms[0].global, GlobalTransform::default());

    // jitter(1) - jitter(0) = (2, 3)
    let g = result.transforms[1].global;
    assert!(
        (g.dx - 2.0).abs() < 0.5 && (g.dy - 3.0).abs() < 0.5,
        "expected (2, 3), got ({}, {})",
        g.dx,
        g.dy
    );
}

#[test]
fn test_align_global_cancelled() {
    let planes: Vec<_> = (0..3)
        .map(|_| common::shifted_planet(32, 32, 0.0, 0.0))
        .collect();
    let source = common::mono_source(planes);
    let aligner = GlobalAligner::new(common::shifted_planet(32, 32, 0.0, 0.0));
    let sink = NoOpSink;
    let reporter = ProgressReporter::new(&sink);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = align_global(&source, &aligner, 0, &[1, 2], &reporter, &cancel).unwrap_err();
    assert!(err.is_cancelled());
}

// ---------------------------------------------------------------------------
// Warping
// ---------------------------------------------------------------------------

#[test]
fn test_bilinear_sample() {
    let data = array![[0.0f32, 1.0], [2.0, 3.0]];
    let view = data.view();
    assert!((bilinear_sample(&view, 0.5, 0.5) - 1.5).abs() < 1e-6);
    assert_eq!(bilinear_sample(&view, 1.0, 1.0), 3.0);
    assert_eq!(bilinear_sample(&view, 0.0, 1.0), 1.0);
    assert!(bilinear_sample(&view, -0.1, 0.0).is_nan());
    assert!(bilinear_sample(&view, 0.0, 1.5).is_nan());
}

#[test]
fn test_warp_translation_undoes_shift() {
    let reference = common::shifted_planet(48, 48, 0.0, 0.0);
    let target = common::shifted_planet(48, 48, 3.0, -2.0);
    let transform = AlignmentTransform {
        frame_index: 1,
        global: GlobalTransform::translation(3.0, -2.0),
        local: None,
    };
    let warped = warp_plane(&target, &transform);

    // Output rows 0..2 would sample above the frame.
    assert!(warped[[0, 10]].is_nan() && warped[[1, 10]].is_nan());
    // Output columns past w - 1 - 3 would sample beyond the right edge.
    assert!(warped[[20, 47]].is_nan());

    for r in 2..48 {
        for c in 0..45 {
            assert!(
                (warped[[r, c]] - reference[[r, c]]).abs() < 1e-5,
                "pixel ({r}, {c}): {} vs {}",
                warped[[r, c]],
                reference[[r, c]]
            );
        }
    }
}

#[test]
fn test_warp_rotation_about_centre() {
    let warp = Warp::global(
        GlobalTransform {
            dx: 0.0,
            dy: 0.0,
            rotation: std::f64::consts::FRAC_PI_2,
            scale: 1.0,
        },
        5,
        5,
    );
    let (y, x) = warp.source_position(2, 2);
    assert!((y - 2.0).abs() < 1e-12 && (x - 2.0).abs() < 1e-12);

    // (x, y) = (1, 0) from the centre maps to (0, 1).
    let (y, x) = warp.source_position(2, 3);
    assert!((y - 3.0).abs() < 1e-12 && (x - 2.0).abs() < 1e-12, "got ({y}, {x})");
}

#[test]
fn test_normalized_residual() {
    let reference = array![[0.0f32, 1.0], [0.0, 1.0]];
    assert_eq!(normalized_residual(&reference, &reference), 0.0);

    let swapped = array![[1.0f32, 0.0], [1.0, 0.0]];
    assert!((normalized_residual(&reference, &swapped) - 2.0).abs() < 1e-9);

    let nothing = Array2::from_elem((2, 2), f32::NAN);
    assert!(normalized_residual(&reference, &nothing).is_infinite());

    let flat = Array2::from_elem((2, 2), 0.5f32);
    assert_eq!(normalized_residual(&flat, &swapped), 0.0);
}
