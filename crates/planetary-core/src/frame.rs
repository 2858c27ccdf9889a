use std::collections::BTreeMap;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::error::{Result, StackerError};

/// Channel layout of a decoded pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Rgb,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Rgb => 3,
        }
    }
}

/// A single decoded video frame.
/// Pixel values are f32 in [0.0, 1.0], one plane per channel.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Position of the frame in its source.
    pub index: usize,
    pub layout: ChannelLayout,
    /// Channel planes, row-major, shape = (height, width)
    pub planes: Vec<Array2<f32>>,
}

impl Frame {
    pub fn mono(index: usize, data: Array2<f32>) -> Self {
        Self {
            index,
            layout: ChannelLayout::Mono,
            planes: vec![data],
        }
    }

    /// Build a frame from per-channel planes, checking count and shape.
    pub fn from_planes(
        index: usize,
        layout: ChannelLayout,
        planes: Vec<Array2<f32>>,
    ) -> Result<Self> {
        if planes.len() != layout.channels() {
            return Err(StackerError::InvalidInput(format!(
                "{:?} frame needs {} planes, got {}",
                layout,
                layout.channels(),
                planes.len()
            )));
        }
        let dim = planes[0].dim();
        if dim.0 == 0 || dim.1 == 0 {
            return Err(StackerError::InvalidInput(format!(
                "Frame {index} has empty dimensions {}x{}",
                dim.1, dim.0
            )));
        }
        if planes.iter().any(|p| p.dim() != dim) {
            return Err(StackerError::InvalidInput(format!(
                "Frame {index} planes have mismatched dimensions"
            )));
        }
        Ok(Self {
            index,
            layout,
            planes,
        })
    }

    /// Build a frame from an interleaved f32 buffer (`RGBRGB...` for color).
    pub fn from_interleaved(
        index: usize,
        width: usize,
        height: usize,
        layout: ChannelLayout,
        data: &[f32],
    ) -> Result<Self> {
        if let Some(position) = data.iter().position(|v| !v.is_finite()) {
            return Err(StackerError::InvalidInput(format!(
                "Frame {index} sample {position} is not finite"
            )));
        }
        Self::from_interleaved_with(index, width, height, layout, data, |v| v)
    }

    /// Build a frame from interleaved 8-bit samples.
    pub fn from_interleaved_u8(
        index: usize,
        width: usize,
        height: usize,
        layout: ChannelLayout,
        data: &[u8],
    ) -> Result<Self> {
        Self::from_interleaved_with(index, width, height, layout, data, |v| {
            v as f32 / 255.0
        })
    }

    /// Build a frame from interleaved samples with `bit_depth` significant bits (9..=16).
    pub fn from_interleaved_u16(
        index: usize,
        width: usize,
        height: usize,
        layout: ChannelLayout,
        data: &[u16],
        bit_depth: u8,
    ) -> Result<Self> {
        if !(1..=16).contains(&bit_depth) {
            return Err(StackerError::InvalidInput(format!(
                "Unsupported bit depth {bit_depth}"
            )));
        }
        let max = ((1u32 << bit_depth) - 1) as f32;
        Self::from_interleaved_with(index, width, height, layout, data, |v| {
            (v as f32 / max).min(1.0)
        })
    }

    fn from_interleaved_with<T: Copy>(
        index: usize,
        width: usize,
        height: usize,
        layout: ChannelLayout,
        data: &[T],
        convert: impl Fn(T) -> f32,
    ) -> Result<Self> {
        let channels = layout.channels();
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(StackerError::InvalidInput(format!(
                "Frame {index}: expected {expected} samples for {width}x{height} {layout:?}, got {}",
                data.len()
            )));
        }
        let planes = (0..channels)
            .map(|ch| {
                Array2::from_shape_fn((height, width), |(row, col)| {
                    convert(data[(row * width + col) * channels + ch])
                })
            })
            .collect();
        Self::from_planes(index, layout, planes)
    }

    pub fn width(&self) -> usize {
        self.planes[0].ncols()
    }

    pub fn height(&self) -> usize {
        self.planes[0].nrows()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.planes[0].dim()
    }

    /// Luminance plane (BT.601 weights for RGB, a copy of the plane for mono).
    pub fn luminance(&self) -> Array2<f32> {
        match self.layout {
            ChannelLayout::Mono => self.planes[0].clone(),
            ChannelLayout::Rgb => {
                let mut lum = Array2::<f32>::zeros(self.dim());
                Zip::from(&mut lum)
                    .and(&self.planes[0])
                    .and(&self.planes[1])
                    .and(&self.planes[2])
                    .for_each(|l, &r, &g, &b| {
                        *l = LUMINANCE_R * r + LUMINANCE_G * g + LUMINANCE_B * b;
                    });
                lum
            }
        }
    }
}

/// Final pipeline output. Owned by the caller once returned.
#[derive(Clone, Debug)]
pub struct SharpenedImage {
    pub layout: ChannelLayout,
    /// Channel planes with values clamped to [0.0, 1.0].
    pub planes: Vec<Array2<f32>>,
}

impl SharpenedImage {
    pub fn width(&self) -> usize {
        self.planes[0].ncols()
    }

    pub fn height(&self) -> usize {
        self.planes[0].nrows()
    }

    /// Interleave the planes into a single row-major buffer.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let (h, w) = self.planes[0].dim();
        let channels = self.planes.len();
        let mut out = Vec::with_capacity(h * w * channels);
        for row in 0..h {
            for col in 0..w {
                for plane in &self.planes {
                    out.push(plane[[row, col]]);
                }
            }
        }
        out
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Centre as (x, y).
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Clip the rectangle to a `width` x `height` frame, keeping it non-empty.
    pub fn clamp_to(&self, width: usize, height: usize) -> Self {
        let x = self.x.min(width.saturating_sub(1));
        let y = self.y.min(height.saturating_sub(1));
        Self {
            x,
            y,
            width: self.width.clamp(1, width - x),
            height: self.height.clamp(1, height - y),
        }
    }
}

/// Quality assessment result for a single analyzed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameScore {
    pub frame_index: usize,
    /// Normalized sharpness in [0.0, 1.0].
    pub quality_score: f64,
    pub roi: Roi,
}

/// Output of the quality analysis stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub total_frames: usize,
    pub sample_step: usize,
    /// Number of sampled frames that failed to decode.
    pub skipped: usize,
    /// Sorted by quality descending, ties by ascending frame index.
    pub scores: Vec<FrameScore>,
}

/// Whole-frame transform of a frame relative to the reference.
///
/// `(dx, dy)` is the displacement of the frame content relative to the
/// reference. A reference-space pixel `p` samples the frame at
/// `c + scale * R(rotation) * (p + (dx, dy) - c)` where `c` is the frame centre.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalTransform {
    pub dx: f64,
    pub dy: f64,
    /// Radians, counter-clockwise in image coordinates.
    pub rotation: f64,
    pub scale: f64,
}

impl Default for GlobalTransform {
    fn default() -> Self {
        Self::translation(0.0, 0.0)
    }
}

impl GlobalTransform {
    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            dx,
            dy,
            rotation: 0.0,
            scale: 1.0,
        }
    }

    pub fn is_translation_only(&self) -> bool {
        self.rotation == 0.0 && self.scale == 1.0
    }
}

/// Tile position in the local alignment grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub row: usize,
    pub col: usize,
}

/// Residual displacement of one tile after global alignment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalShift {
    pub dx: f64,
    pub dy: f64,
}

/// Sparse per-tile displacement field. Tiles without an entry inherit the
/// global transform unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalShiftField {
    pub tile_size: usize,
    pub frame_height: usize,
    pub frame_width: usize,
    pub shifts: BTreeMap<TileCoord, LocalShift>,
}

impl LocalShiftField {
    pub fn tiles_y(&self) -> usize {
        self.frame_height.div_ceil(self.tile_size)
    }

    pub fn tiles_x(&self) -> usize {
        self.frame_width.div_ceil(self.tile_size)
    }
}

/// Complete alignment of one selected frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlignmentTransform {
    pub frame_index: usize,
    pub global: GlobalTransform,
    /// Present only when local alignment ran for this frame.
    pub local: Option<LocalShiftField>,
}
