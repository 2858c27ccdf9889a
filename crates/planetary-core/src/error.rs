use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to decode frame {index}: {reason}")]
    DecodeFailure { index: usize, reason: String },

    #[error("Frame {index} rejected by alignment (confidence {confidence:.2} < {required:.2})")]
    AlignmentFailure {
        index: usize,
        confidence: f64,
        required: f64,
    },

    #[error("Only {usable} usable frames remain, at least {required} required")]
    InsufficientFrames { usable: usize, required: usize },

    #[error("Numeric failure: {0}")]
    NumericFailure(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Coarse classification of a [`StackerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    DecodeFailure,
    AlignmentFailure,
    InsufficientFrames,
    NumericFailure,
    Cancelled,
}

impl StackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_)
            | Self::Io(_)
            | Self::Config(_)
            | Self::ConfigSerialize(_) => ErrorKind::InvalidInput,
            Self::DecodeFailure { .. } => ErrorKind::DecodeFailure,
            Self::AlignmentFailure { .. } => ErrorKind::AlignmentFailure,
            Self::InsufficientFrames { .. } => ErrorKind::InsufficientFrames,
            Self::NumericFailure(_) => ErrorKind::NumericFailure,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Per-frame problems that the pipeline absorbs by excluding the frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DecodeFailure | ErrorKind::AlignmentFailure
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, StackerError>;
