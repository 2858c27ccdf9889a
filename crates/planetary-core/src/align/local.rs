use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{s, Array2};
use rayon::prelude::*;
use rustfft::FftPlanner;
use tracing::{debug, info, warn};

use crate::consts::{MIN_TILE_CONFIDENCE, MIN_TILE_STDDEV};
use crate::detection::threshold::compute_mean_stddev;
use crate::error::{Result, StackerError};
use crate::frame::{AlignmentTransform, LocalShift, LocalShiftField, TileCoord};
use crate::pipeline::{CancellationToken, PipelineStage, ProgressReporter};
use crate::source::FrameSource;

use super::fft::{hann_window, Fft2d};
use super::phase_correlation::PhaseCorrelator;
use super::warp::Warp;

/// Correlation window of one tile: the tile grown by the search margin on
/// every side, clipped to the frame.
struct TileWindow {
    coord: TileCoord,
    rows: (usize, usize),
    cols: (usize, usize),
    correlator: PhaseCorrelator,
}

/// Tile-based residual aligner.
///
/// Reference tiles with too little structure to correlate are dropped when
/// the aligner is built; their residual is never measured.
pub struct LocalAligner {
    tile_size: usize,
    margin: usize,
    height: usize,
    width: usize,
    tiles: Vec<TileWindow>,
}

impl LocalAligner {
    pub fn new(reference: &Array2<f32>, tile_size: usize) -> Self {
        let (h, w) = reference.dim();
        let margin = tile_size / 2;
        let mut planner = FftPlanner::new();
        let mut tiles = Vec::new();

        for ty in 0..h.div_ceil(tile_size) {
            for tx in 0..w.div_ceil(tile_size) {
                let y0 = ty * tile_size;
                let x0 = tx * tile_size;
                let y1 = (y0 + tile_size).min(h);
                let x1 = (x0 + tile_size).min(w);

                let (_, stddev) = compute_mean_stddev(reference.slice(s![y0..y1, x0..x1]));
                if stddev < MIN_TILE_STDDEV as f64 {
                    continue;
                }

                let rows = (y0.saturating_sub(margin), (y1 + margin).min(h));
                let cols = (x0.saturating_sub(margin), (x1 + margin).min(w));
                let (wh, ww) = (rows.1 - rows.0, cols.1 - cols.0);
                if wh < 4 || ww < 4 {
                    continue;
                }
                let window = reference.slice(s![rows.0..rows.1, cols.0..cols.1]);
                let fft = Fft2d::with_planner(&mut planner, wh, ww);
                tiles.push(TileWindow {
                    coord: TileCoord { row: ty, col: tx },
                    rows,
                    cols,
                    correlator: PhaseCorrelator::with_fft(window, hann_window(wh, ww), fft),
                });
            }
        }

        debug!(
            tiles = tiles.len(),
            tile_size,
            "Local alignment tiles with usable structure"
        );

        Self {
            tile_size,
            margin,
            height: h,
            width: w,
            tiles,
        }
    }

    /// Number of tiles with enough structure to be correlated.
    pub fn active_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Measure per-tile residuals of `target` after its global transform.
    ///
    /// Tiles whose correlation is weak, whose residual exceeds the search
    /// margin, or whose window is mostly outside the warped frame get no
    /// entry and follow the global transform.
    pub fn align(
        &self,
        target: &Array2<f32>,
        transform: &AlignmentTransform,
        cancel: &CancellationToken,
    ) -> Result<LocalShiftField> {
        if target.dim() != (self.height, self.width) {
            return Err(StackerError::DecodeFailure {
                index: transform.frame_index,
                reason: "frame size differs from the reference".into(),
            });
        }
        let warped = Warp::global(transform.global, self.height, self.width).apply(target);
        let margin = self.margin as f64;

        let measured: Vec<Option<(TileCoord, LocalShift)>> = self
            .tiles
            .par_iter()
            .map(|tile| -> Result<Option<(TileCoord, LocalShift)>> {
                cancel.check()?;
                let window = warped.slice(s![tile.rows.0..tile.rows.1, tile.cols.0..tile.cols.1]);
                let valid = window.iter().filter(|v| v.is_finite()).count();
                if valid * 2 < window.len() {
                    return Ok(None);
                }
                let c = tile.correlator.correlate(window)?;
                if c.confidence < MIN_TILE_CONFIDENCE || c.dx.abs() > margin || c.dy.abs() > margin
                {
                    return Ok(None);
                }
                Ok(Some((tile.coord, LocalShift { dx: c.dx, dy: c.dy })))
            })
            .collect::<Result<_>>()?;

        let shifts: BTreeMap<TileCoord, LocalShift> = measured.into_iter().flatten().collect();
        debug!(
            frame = transform.frame_index,
            accepted = shifts.len(),
            tiles = self.tiles.len(),
            "Local alignment"
        );

        Ok(LocalShiftField {
            tile_size: self.tile_size,
            frame_height: self.height,
            frame_width: self.width,
            shifts,
        })
    }
}

/// Add a local shift field to every non-reference transform, in parallel.
///
/// The reference (first transform) keeps `local: None`. Frames that fail to
/// decode here are dropped from the list and counted.
pub fn align_local(
    source: &dyn FrameSource,
    aligner: &LocalAligner,
    transforms: Vec<AlignmentTransform>,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<(Vec<AlignmentTransform>, usize)> {
    let counter = AtomicUsize::new(0);
    let total = transforms.len().saturating_sub(1);

    let results: Vec<Result<AlignmentTransform>> = transforms
        .into_par_iter()
        .enumerate()
        .map(|(position, mut transform)| -> Result<AlignmentTransform> {
            if position == 0 {
                return Ok(transform);
            }
            cancel.check()?;
            let frame = source.decode(transform.frame_index)?;
            let field = aligner.align(&frame.luminance(), &transform, cancel)?;
            transform.local = Some(field);
            let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.advance(PipelineStage::LocalAlign, done, total);
            Ok(transform)
        })
        .collect();

    let mut refined = Vec::with_capacity(results.len());
    let mut excluded = 0usize;
    for result in results {
        match result {
            Ok(t) => refined.push(t),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Excluding frame from stack");
                excluded += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        frames = refined.len(),
        tiles = aligner.active_tiles(),
        excluded,
        "Local alignment complete"
    );
    Ok((refined, excluded))
}
