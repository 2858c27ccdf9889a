pub mod fft;
pub mod global;
pub mod local;
pub mod phase_correlation;
pub mod rotation;
pub mod subpixel;
pub mod warp;

pub use global::{align_global, GlobalAligner, GlobalAlignment, GlobalEstimate, Refinement};
pub use local::{align_local, LocalAligner};
pub use phase_correlation::{Correlation, PhaseCorrelator, Weighting};
pub use warp::{bilinear_sample, warp_plane, Warp};
