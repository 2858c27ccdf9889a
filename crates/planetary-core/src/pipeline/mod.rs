pub mod config;
mod orchestrator;
mod types;

pub use config::{ProcessingParams, QualityMetric};
pub use orchestrator::{analyze_frames, analyze_frames_with_progress, process_video};
pub use types::{CancellationToken, NoOpSink, PipelineStage, ProgressReporter, ProgressSink};
