use ndarray::{s, Array2, ArrayView2, Zip};
use rayon::prelude::*;

use crate::consts::{SIGMA_CLIP_SLACK, STACK_BAND_ROWS};
use crate::error::{Result, StackerError};

/// Welford running statistics for one plane region.
#[derive(Clone, Debug)]
struct PlaneStats {
    count: Array2<u32>,
    mean: Array2<f64>,
    m2: Array2<f64>,
}

impl PlaneStats {
    fn zeros(dim: (usize, usize)) -> Self {
        Self {
            count: Array2::zeros(dim),
            mean: Array2::zeros(dim),
            m2: Array2::zeros(dim),
        }
    }
}

/// A horizontal strip of the output, owned by exactly one worker per update.
#[derive(Clone, Debug)]
struct Band {
    row0: usize,
    rows: usize,
    /// One entry per channel.
    current: Vec<PlaneStats>,
    /// Statistics of the previous pass; the clipping reference.
    previous: Option<Vec<PlaneStats>>,
}

/// Per-pixel running mean/variance over a stream of aligned frames.
///
/// Frames are pushed one at a time and never retained. The first pass
/// accepts every finite sample; each clipping pass started with
/// [`StackAccumulator::begin_clip_pass`] accepts only samples within
/// `threshold * stddev` of the previous pass's mean. Updates run over
/// disjoint row bands in parallel.
#[derive(Clone, Debug)]
pub struct StackAccumulator {
    height: usize,
    width: usize,
    channels: usize,
    threshold: f64,
    bands: Vec<Band>,
    accepted: u64,
}

impl StackAccumulator {
    pub fn new(height: usize, width: usize, channels: usize, threshold: f64) -> Self {
        let bands = (0..height)
            .step_by(STACK_BAND_ROWS)
            .map(|row0| {
                let rows = STACK_BAND_ROWS.min(height - row0);
                Band {
                    row0,
                    rows,
                    current: (0..channels)
                        .map(|_| PlaneStats::zeros((rows, width)))
                        .collect(),
                    previous: None,
                }
            })
            .collect();
        Self {
            height,
            width,
            channels,
            threshold,
            bands,
            accepted: 0,
        }
    }

    /// Samples accepted since the current pass started.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// True once a clipping pass has been started.
    pub fn is_clipping(&self) -> bool {
        self.bands.iter().any(|b| b.previous.is_some())
    }

    /// Feed one aligned frame (one plane per channel). Non-finite samples
    /// are ignored.
    pub fn push(&mut self, planes: &[Array2<f32>]) -> Result<()> {
        if planes.len() != self.channels {
            return Err(StackerError::NumericFailure(format!(
                "expected {} planes, got {}",
                self.channels,
                planes.len()
            )));
        }
        if let Some(p) = planes.iter().find(|p| p.dim() != (self.height, self.width)) {
            return Err(StackerError::NumericFailure(format!(
                "plane is {}x{}, stack is {}x{}",
                p.ncols(),
                p.nrows(),
                self.width,
                self.height
            )));
        }

        let threshold = self.threshold;
        let accepted: u64 = self
            .bands
            .par_iter_mut()
            .map(|band| {
                let (r0, r1) = (band.row0, band.row0 + band.rows);
                let previous = band.previous.as_deref();
                band.current
                    .iter_mut()
                    .enumerate()
                    .map(|(ch, stats)| {
                        let bounds = previous.map(|p| &p[ch]);
                        update_stats(stats, planes[ch].slice(s![r0..r1, ..]), bounds, threshold)
                    })
                    .sum::<u64>()
            })
            .sum();
        self.accepted += accepted;
        Ok(())
    }

    /// Close the current pass and start a clipping pass against it.
    pub fn begin_clip_pass(&mut self) {
        let (width, channels) = (self.width, self.channels);
        for band in &mut self.bands {
            let fresh = (0..channels)
                .map(|_| PlaneStats::zeros((band.rows, width)))
                .collect();
            let finished = std::mem::replace(&mut band.current, fresh);
            band.previous = Some(finished);
        }
        self.accepted = 0;
    }

    /// Pixels that accepted nothing in the current clipping pass take back
    /// the previous pass's statistics.
    pub fn end_pass(&mut self) {
        self.bands.par_iter_mut().for_each(|band| {
            let Some(previous) = band.previous.as_ref() else {
                return;
            };
            for (stats, prev) in band.current.iter_mut().zip(previous) {
                Zip::from(&mut stats.count)
                    .and(&mut stats.mean)
                    .and(&mut stats.m2)
                    .and(&prev.count)
                    .and(&prev.mean)
                    .and(&prev.m2)
                    .for_each(|c, m, q, &pc, &pm, &pq| {
                        if *c == 0 {
                            *c = pc;
                            *m = pm;
                            *q = pq;
                        }
                    });
            }
        });
    }

    /// Per-channel mean planes. Every pixel must have received at least one
    /// sample; a pixel without samples is a `NumericFailure`.
    pub fn finish(self) -> Result<Vec<Array2<f32>>> {
        let mut planes: Vec<Array2<f32>> = (0..self.channels)
            .map(|_| Array2::zeros((self.height, self.width)))
            .collect();

        for band in &self.bands {
            for (plane, stats) in planes.iter_mut().zip(&band.current) {
                if let Some(((r, c), _)) = stats.count.indexed_iter().find(|(_, n)| **n == 0) {
                    return Err(StackerError::NumericFailure(format!(
                        "pixel ({}, {}) received no valid samples",
                        band.row0 + r,
                        c
                    )));
                }
                plane
                    .slice_mut(s![band.row0..band.row0 + band.rows, ..])
                    .zip_mut_with(&stats.mean, |out, &m| *out = m as f32);
            }
        }
        Ok(planes)
    }
}

/// Welford update of one band region. With `bounds`, a sample is accepted
/// only if it lies within `threshold` standard deviations of the previous
/// pass's mean. Returns the number of accepted samples.
fn update_stats(
    stats: &mut PlaneStats,
    samples: ArrayView2<f32>,
    bounds: Option<&PlaneStats>,
    threshold: f64,
) -> u64 {
    let mut accepted = 0u64;
    let mut accept = |count: &mut u32, mean: &mut f64, m2: &mut f64, x: f64| {
        *count += 1;
        let delta = x - *mean;
        *mean += delta / *count as f64;
        *m2 += delta * (x - *mean);
        accepted += 1;
    };

    match bounds {
        None => Zip::from(&mut stats.count)
            .and(&mut stats.mean)
            .and(&mut stats.m2)
            .and(&samples)
            .for_each(|n, mean, m2, &x| {
                if x.is_finite() {
                    accept(n, mean, m2, x as f64);
                }
            }),
        Some(prev) => Zip::indexed(&mut stats.count)
            .and(&mut stats.mean)
            .and(&mut stats.m2)
            .and(&samples)
            .for_each(|idx, n, mean, m2, &x| {
                let pn = prev.count[idx];
                if !x.is_finite() || pn == 0 {
                    return;
                }
                let stddev = (prev.m2[idx] / pn as f64).sqrt();
                let x = x as f64;
                if (x - prev.mean[idx]).abs() <= threshold * stddev + SIGMA_CLIP_SLACK {
                    accept(n, mean, m2, x);
                }
            }),
    }
    accepted
}
