/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// B3 spline 1D kernel coefficients: [1, 4, 6, 4, 1] / 16.
pub const B3_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Number of detail layers produced by the wavelet sharpener.
pub const WAVELET_LAYERS: usize = 5;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Number of frames decoded simultaneously during quality analysis.
/// Balances memory usage vs. parallelism. At 4096x4096 f32, 8 frames = 512 MB.
pub const ANALYSIS_BATCH_SIZE: usize = 8;

/// Number of histogram bins for Otsu's thresholding.
pub const OTSU_HISTOGRAM_BINS: usize = 256;

/// Padding added around the detected subject bounding box (fraction of its size).
pub const ROI_PADDING_FRACTION: f32 = 0.1;

/// Maximum ROI centre motion per sample step, as a fraction of the larger
/// frame dimension. Larger jumps are treated as detection glitches.
pub const MAX_ROI_SHIFT_FRACTION: f64 = 0.05;

/// Weight of the newly detected ROI when blending with the previous one.
pub const ROI_SMOOTHING: f64 = 0.5;

/// Smallest bright blob (pixels) accepted as the imaged subject.
pub const MIN_SUBJECT_AREA: usize = 9;

/// Minimum peak-to-mean ratio of the whole-frame correlation surface.
pub const MIN_GLOBAL_CONFIDENCE: f64 = 8.0;

/// Minimum peak-to-mean ratio of a tile's correlation surface.
pub const MIN_TILE_CONFIDENCE: f64 = 6.0;

/// Radius (pixels) around the correlation peak excluded from the background mean.
pub const PEAK_EXCLUSION_RADIUS: usize = 2;

/// Tiles whose reference standard deviation is below this carry no structure
/// to correlate against.
pub const MIN_TILE_STDDEV: f32 = 1e-3;

/// Normalized translation-only residual above which rotation/scale refinement
/// is attempted.
pub const ROTATION_RESIDUAL_TOLERANCE: f64 = 0.02;

/// A rotation/scale estimate is kept only if it lowers the residual below
/// this fraction of the translation-only residual.
pub const ROTATION_MIN_IMPROVEMENT: f64 = 0.9;

/// Angular resolution of the log-polar resampling (bins over 180 degrees).
pub const LOG_POLAR_ANGLES: usize = 360;

/// Radial resolution of the log-polar resampling.
pub const LOG_POLAR_RADII: usize = 128;

/// Added before rounding the kept frame count so that a product which is a
/// half in decimal rounds up.
pub const KEEP_ROUNDING_SLACK: f64 = 1e-9;

/// Zero-padding factor applied before the magnitude spectrum is resampled.
/// At the critical sampling rate, bilinear resampling pins small rotations
/// to the frequency grid.
pub const SPECTRUM_OVERSAMPLING: usize = 2;

/// Largest plausible field rotation between frames (radians).
pub const MAX_ROTATION_RADIANS: f64 = 0.35;

/// Largest plausible magnification between frames (and its inverse).
pub const MAX_SCALE_RATIO: f64 = 1.2;

/// Rows per band in the stacking accumulator.
pub const STACK_BAND_ROWS: usize = 32;

/// Slack added to the sigma-clip acceptance window so that zero-variance
/// pixels keep the samples equal to their mean.
pub const SIGMA_CLIP_SLACK: f64 = 1e-9;
