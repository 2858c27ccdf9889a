pub mod accumulator;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::align::warp_plane;
use crate::error::{Result, StackerError};
use crate::frame::{AlignmentTransform, GlobalTransform};
use crate::pipeline::{CancellationToken, PipelineStage, ProgressReporter};
use crate::source::FrameSource;

pub use accumulator::StackAccumulator;

/// Shape and rejection settings of one stacking run.
#[derive(Clone, Copy, Debug)]
pub struct StackSettings {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub sigma_threshold: f32,
    /// Clipping passes after the initial pass; 0 = plain mean.
    pub sigma_iterations: usize,
}

/// Stream the aligned frames through a [`StackAccumulator`].
///
/// Every pass decodes and warps each frame again, so memory stays at one
/// frame plus the accumulator regardless of the number of frames. Clipping
/// passes stop early once a pass accepts the same number of samples as the
/// one before it.
pub fn stack_aligned(
    source: &dyn FrameSource,
    transforms: &[AlignmentTransform],
    settings: &StackSettings,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<Array2<f32>>> {
    if transforms.is_empty() {
        return Err(StackerError::InvalidInput("nothing to stack".into()));
    }

    let passes = 1 + settings.sigma_iterations;
    let total_work = transforms.len() * passes;
    let mut acc = StackAccumulator::new(
        settings.height,
        settings.width,
        settings.channels,
        settings.sigma_threshold as f64,
    );
    let mut dropped = vec![false; transforms.len()];
    let mut previous_accepted: Option<u64> = None;

    for pass in 0..passes {
        if pass > 0 {
            acc.begin_clip_pass();
        }

        for (i, transform) in transforms.iter().enumerate() {
            cancel.check()?;
            if !dropped[i] {
                match source.decode(transform.frame_index) {
                    Ok(frame) if frame.planes.len() != settings.channels => {
                        warn!(
                            frame = transform.frame_index,
                            "Channel layout differs from the reference, skipping"
                        );
                        dropped[i] = true;
                    }
                    Ok(frame) => {
                        let warped = if is_identity(transform) {
                            frame.planes
                        } else {
                            frame
                                .planes
                                .iter()
                                .map(|p| warp_plane(p, transform))
                                .collect()
                        };
                        acc.push(&warped)?;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(frame = transform.frame_index, error = %e, "Skipping frame in stack");
                        dropped[i] = true;
                    }
                    Err(e) => return Err(e),
                }
            }
            reporter.advance(PipelineStage::Stack, pass * transforms.len() + i + 1, total_work);
        }

        acc.end_pass();
        let accepted = acc.accepted();
        debug!(pass, accepted, "Stacking pass complete");
        if previous_accepted == Some(accepted) {
            debug!(pass, "Sigma clipping converged");
            break;
        }
        previous_accepted = Some(accepted);
    }

    info!(
        frames = transforms.len() - dropped.iter().filter(|d| **d).count(),
        sigma_iterations = settings.sigma_iterations,
        "Stacking complete"
    );
    acc.finish()
}

fn is_identity(transform: &AlignmentTransform) -> bool {
    transform.global == GlobalTransform::default()
        && transform.local.as_ref().map_or(true, |f| f.shifts.is_empty())
}
