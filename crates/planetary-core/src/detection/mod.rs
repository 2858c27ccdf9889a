pub mod components;
pub mod roi;
pub mod threshold;

pub use roi::{detect_subject, RoiTracker};
