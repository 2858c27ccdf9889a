pub mod consts;
pub mod error;
pub mod frame;
pub mod source;
pub mod detection;
pub mod quality;
pub mod selection;
pub mod align;
pub mod stack;
pub mod sharpen;
pub mod pipeline;
pub mod session;

pub use error::{ErrorKind, Result, StackerError};
pub use frame::{ChannelLayout, Frame, SharpenedImage};
pub use pipeline::{
    analyze_frames, analyze_frames_with_progress, process_video, CancellationToken,
    ProcessingParams, ProgressSink,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub use session::StackerSession;
pub use source::{FrameSource, MemoryFrameSource};
