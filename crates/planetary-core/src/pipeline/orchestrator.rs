use rayon::prelude::*;
use tracing::{info, warn};

use crate::align::{align_global, align_local, GlobalAligner, LocalAligner};
use crate::error::{Result, StackerError};
use crate::frame::{AnalysisResult, Frame, SharpenedImage};
use crate::quality::analyze_sampled;
use crate::selection::select_frames;
use crate::sharpen::wavelet;
use crate::source::FrameSource;
use crate::stack::{stack_aligned, StackSettings};

use super::config::{ProcessingParams, QualityMetric};
use super::types::{CancellationToken, NoOpSink, PipelineStage, ProgressReporter, ProgressSink};

/// Score every `sample_step`-th frame of `source` with the default metric.
pub fn analyze_frames(source: &dyn FrameSource, sample_step: usize) -> Result<AnalysisResult> {
    analyze_frames_with_progress(source, sample_step, &NoOpSink, &CancellationToken::new())
}

/// [`analyze_frames`] with progress over the full 0..=100 scale, ending with
/// `(100, "Complete")`, and cancellation between frame batches.
pub fn analyze_frames_with_progress(
    source: &dyn FrameSource,
    sample_step: usize,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<AnalysisResult> {
    if source.total_frames() == 0 {
        return Err(StackerError::InvalidInput("source has no frames".into()));
    }
    cancel.check()?;
    let reporter = ProgressReporter::single_stage(progress, PipelineStage::Analyze);
    reporter.begin_stage(PipelineStage::Analyze);
    let analysis = analyze_sampled(
        source,
        sample_step,
        QualityMetric::default(),
        &reporter,
        cancel,
    )?;
    reporter.finish_stage(PipelineStage::Analyze);
    reporter.finish_stage(PipelineStage::Done);
    Ok(analysis)
}

/// Run the full pipeline: analyze, select, align, stack, sharpen.
///
/// Progress goes to `progress` with a non-decreasing percentage. Setting
/// `cancel` stops the run at the next frame or tile and returns
/// `Err(StackerError::Cancelled)`.
pub fn process_video(
    source: &dyn FrameSource,
    params: &ProcessingParams,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<SharpenedImage> {
    params.validate()?;
    let total = source.total_frames();
    if total == 0 {
        return Err(StackerError::InvalidInput("source has no frames".into()));
    }
    let reporter = ProgressReporter::new(progress);
    info!(
        total_frames = total,
        sample_step = params.sample_step,
        local_align = params.enable_local_align,
        "Starting pipeline"
    );

    // Stage 1: quality analysis
    cancel.check()?;
    reporter.begin_stage(PipelineStage::Analyze);
    let analysis = analyze_sampled(
        source,
        params.sample_step,
        params.quality_metric,
        &reporter,
        cancel,
    )?;
    reporter.finish_stage(PipelineStage::Analyze);
    ensure_usable(analysis.scores.len(), params.min_usable_frames)?;

    // Stage 2: selection
    cancel.check()?;
    reporter.begin_stage(PipelineStage::Select);
    let selection = select_frames(&analysis, params);
    reporter.finish_stage(PipelineStage::Select);

    // Stage 3: global alignment
    cancel.check()?;
    reporter.begin_stage(PipelineStage::GlobalAlign);
    let (position, reference) = load_reference(source, &selection.indices)?;
    let layout = reference.layout;
    let (height, width) = reference.dim();
    let aligner = GlobalAligner::new(reference.luminance());
    drop(reference);

    let reference_index = selection.indices[position];
    let others = &selection.indices[position + 1..];
    let global = reporter.parallel(|| {
        align_global(
            source,
            &aligner,
            reference_index,
            others,
            &reporter,
            cancel,
        )
    })?;
    reporter.finish_stage(PipelineStage::GlobalAlign);
    ensure_usable(global.transforms.len(), params.min_usable_frames)?;

    // Stage 4: local alignment
    let transforms = if params.enable_local_align {
        cancel.check()?;
        reporter.begin_stage(PipelineStage::LocalAlign);
        let local = LocalAligner::new(aligner.reference(), params.tile_size);
        let (transforms, _) = reporter.parallel(|| {
            align_local(source, &local, global.transforms, &reporter, cancel)
        })?;
        reporter.finish_stage(PipelineStage::LocalAlign);
        ensure_usable(transforms.len(), params.min_usable_frames)?;
        transforms
    } else {
        global.transforms
    };
    drop(aligner);

    // Stage 5: stacking
    cancel.check()?;
    reporter.begin_stage(PipelineStage::Stack);
    let settings = StackSettings {
        height,
        width,
        channels: layout.channels(),
        sigma_threshold: params.sigma_clip_threshold,
        sigma_iterations: params.sigma_iterations,
    };
    let stacked = stack_aligned(source, &transforms, &settings, &reporter, cancel)?;
    reporter.finish_stage(PipelineStage::Stack);

    // Stage 6: wavelet sharpening
    cancel.check()?;
    reporter.begin_stage(PipelineStage::Sharpen);
    let planes: Vec<_> = stacked
        .par_iter()
        .map(|plane| wavelet::sharpen(plane, &params.wavelet_layers))
        .collect();
    if planes.iter().any(|p| p.iter().any(|v| !v.is_finite())) {
        return Err(StackerError::NumericFailure(
            "sharpened image contains non-finite values".into(),
        ));
    }
    reporter.finish_stage(PipelineStage::Sharpen);

    reporter.finish_stage(PipelineStage::Done);
    info!(
        frames_stacked = transforms.len(),
        width,
        height,
        "Pipeline complete"
    );
    Ok(SharpenedImage { layout, planes })
}

/// Decode the best selected frame, falling back to the next one when it
/// cannot be decoded. Returns its position in `indices`.
fn load_reference(source: &dyn FrameSource, indices: &[usize]) -> Result<(usize, Frame)> {
    for (position, &index) in indices.iter().enumerate() {
        match source.decode(index) {
            Ok(frame) => {
                info!(frame = index, "Reference frame");
                return Ok((position, frame));
            }
            Err(e) if e.is_recoverable() => {
                warn!(frame = index, error = %e, "Reference candidate failed to decode");
            }
            Err(e) => return Err(e),
        }
    }
    Err(StackerError::InsufficientFrames {
        usable: 0,
        required: 1,
    })
}

fn ensure_usable(usable: usize, required: usize) -> Result<()> {
    if usable < required {
        return Err(StackerError::InsufficientFrames { usable, required });
    }
    Ok(())
}
