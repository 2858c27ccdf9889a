use crate::error::{Result, StackerError};
use crate::frame::Frame;

/// Supplier of decoded frames.
///
/// Implementations are shared between worker threads, so `decode` takes
/// `&self` and may be called concurrently for different indices. A frame
/// that cannot be decoded should yield [`StackerError::DecodeFailure`]; the
/// pipeline skips it and keeps going.
pub trait FrameSource: Send + Sync {
    fn total_frames(&self) -> usize;

    fn decode(&self, index: usize) -> Result<Frame>;
}

/// Frames already decoded into memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryFrameSource {
    frames: Vec<Frame>,
}

impl MemoryFrameSource {
    /// Frames are re-indexed by position.
    pub fn new(frames: Vec<Frame>) -> Self {
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(i, mut f)| {
                f.index = i;
                f
            })
            .collect();
        Self { frames }
    }
}

impl FrameSource for MemoryFrameSource {
    fn total_frames(&self) -> usize {
        self.frames.len()
    }

    fn decode(&self, index: usize) -> Result<Frame> {
        self.frames
            .get(index)
            .cloned()
            .ok_or_else(|| StackerError::DecodeFailure {
                index,
                reason: format!("index out of range (total: {})", self.frames.len()),
            })
    }
}
