pub mod wavelet;

pub use wavelet::sharpen;
