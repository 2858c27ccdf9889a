use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::WAVELET_LAYERS;
use crate::error::{Result, StackerError};

/// Sharpness statistic used to rank frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMetric {
    /// Variance of the 3x3 Laplacian response.
    #[default]
    Laplacian,
    /// Mean Sobel gradient magnitude.
    Gradient,
}

impl std::fmt::Display for QualityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Laplacian => write!(f, "Laplacian"),
            Self::Gradient => write!(f, "Gradient"),
        }
    }
}

/// Immutable configuration for one `process_video` run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParams {
    /// Fraction of frames to keep (0.0..=1.0).
    pub keep_percentage: f64,
    pub min_frames: usize,
    pub max_frames: usize,
    /// Tile-based local alignment after global alignment.
    pub enable_local_align: bool,
    /// Local alignment tile edge in pixels (power of two).
    pub tile_size: usize,
    /// Samples further than this many standard deviations from the mean are rejected.
    pub sigma_clip_threshold: f32,
    /// Number of sigma-clipping passes; 0 = plain mean.
    pub sigma_iterations: usize,
    /// Wavelet layer gains, finest to coarsest.
    pub wavelet_layers: [f32; WAVELET_LAYERS],
    /// Analyze every Nth frame.
    pub sample_step: usize,
    pub quality_metric: QualityMetric,
    /// Fewer usable frames than this after alignment exclusions is fatal.
    pub min_usable_frames: usize,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            keep_percentage: 0.25,
            min_frames: 50,
            max_frames: 500,
            enable_local_align: true,
            tile_size: 32,
            sigma_clip_threshold: 2.5,
            sigma_iterations: 2,
            wavelet_layers: [0.8, 1.5, 2.0, 1.8, 1.2],
            sample_step: 1,
            quality_metric: QualityMetric::Laplacian,
            min_usable_frames: 3,
        }
    }
}

impl ProcessingParams {
    /// Check every field constraint. Returns `InvalidInput` on the first violation.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StackerError::InvalidInput(msg));

        if !(0.0..=1.0).contains(&self.keep_percentage) {
            return invalid(format!(
                "keep_percentage must be within [0, 1], got {}",
                self.keep_percentage
            ));
        }
        if self.min_frames > self.max_frames {
            return invalid(format!(
                "min_frames ({}) exceeds max_frames ({})",
                self.min_frames, self.max_frames
            ));
        }
        if self.max_frames == 0 {
            return invalid("max_frames must be at least 1".into());
        }
        if !self.tile_size.is_power_of_two() || self.tile_size < 4 {
            return invalid(format!(
                "tile_size must be a power of two >= 4, got {}",
                self.tile_size
            ));
        }
        if !(self.sigma_clip_threshold.is_finite() && self.sigma_clip_threshold > 0.0) {
            return invalid(format!(
                "sigma_clip_threshold must be positive, got {}",
                self.sigma_clip_threshold
            ));
        }
        if let Some((i, g)) = self
            .wavelet_layers
            .iter()
            .enumerate()
            .find(|(_, g)| !(g.is_finite() && **g >= 0.0))
        {
            return invalid(format!("wavelet layer {i} gain must be >= 0, got {g}"));
        }
        if self.sample_step == 0 {
            return invalid("sample_step must be at least 1".into());
        }
        if self.min_usable_frames == 0 {
            return invalid("min_usable_frames must be at least 1".into());
        }
        Ok(())
    }

    /// Parse from TOML. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
}
