use crate::error::Result;
use crate::frame::{AnalysisResult, SharpenedImage};
use crate::pipeline::{self, CancellationToken, ProcessingParams, ProgressSink};
use crate::source::FrameSource;

/// Caller-owned handle over the pipeline entry points.
///
/// Remembers the description of the most recent failure so that a binding
/// layer can fetch it after the fact. A successful call clears it. Separate
/// sessions share nothing.
#[derive(Debug, Default)]
pub struct StackerSession {
    last_error: Option<String>,
}

impl StackerSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Description of the last failed call, if the latest call failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn analyze_frames(
        &mut self,
        source: &dyn FrameSource,
        sample_step: usize,
    ) -> Result<AnalysisResult> {
        let result = pipeline::analyze_frames(source, sample_step);
        self.record(result)
    }

    pub fn analyze_frames_with_progress(
        &mut self,
        source: &dyn FrameSource,
        sample_step: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let result = pipeline::analyze_frames_with_progress(source, sample_step, progress, cancel);
        self.record(result)
    }

    pub fn process_video(
        &mut self,
        source: &dyn FrameSource,
        params: &ProcessingParams,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<SharpenedImage> {
        let result = pipeline::process_video(source, params, progress, cancel);
        self.record(result)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = result.as_ref().err().map(|e| e.to_string());
        result
    }
}
