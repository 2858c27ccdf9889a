use ndarray::{Array2, ArrayView2, Zip};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::frame::{AlignmentTransform, GlobalTransform, LocalShiftField, TileCoord};

/// Bilinear sample at fractional `(y, x)`.
///
/// Positions outside the frame yield `NaN`; callers treat that as "no sample".
pub fn bilinear_sample(data: &ArrayView2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    const EDGE: f64 = 1e-6;
    if !(y >= -EDGE && x >= -EDGE && y <= (h - 1) as f64 + EDGE && x <= (w - 1) as f64 + EDGE) {
        return f32::NAN;
    }
    let y = y.clamp(0.0, (h - 1) as f64);
    let x = x.clamp(0.0, (w - 1) as f64);

    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = (y - y0 as f64) as f32;
    let fx = (x - x0 as f64) as f32;

    let v00 = data[[y0, x0]];
    let v01 = data[[y0, x1]];
    let v10 = data[[y1, x0]];
    let v11 = data[[y1, x1]];

    v00 * (1.0 - fx) * (1.0 - fy) + v01 * fx * (1.0 - fy) + v10 * (1.0 - fx) * fy + v11 * fx * fy
}

/// Maps reference-space pixels to source-frame positions for one transform.
pub struct Warp<'a> {
    global: GlobalTransform,
    centre: (f64, f64),
    surface: Option<ShiftSurface<'a>>,
}

impl<'a> Warp<'a> {
    pub fn new(transform: &'a AlignmentTransform, height: usize, width: usize) -> Self {
        let mut warp = Self::global(transform.global, height, width);
        warp.surface = transform
            .local
            .as_ref()
            .filter(|field| !field.shifts.is_empty())
            .map(ShiftSurface::new);
        warp
    }

    pub fn global(global: GlobalTransform, height: usize, width: usize) -> Self {
        Self {
            global,
            centre: ((height as f64 - 1.0) / 2.0, (width as f64 - 1.0) / 2.0),
            surface: None,
        }
    }

    /// Source position `(y, x)` for output pixel `(row, col)`.
    pub fn source_position(&self, row: usize, col: usize) -> (f64, f64) {
        let (mut y, mut x) = (row as f64, col as f64);
        if let Some(surface) = &self.surface {
            let (dy, dx) = surface.at(row, col);
            y += dy;
            x += dx;
        }
        let g = &self.global;
        y += g.dy;
        x += g.dx;
        if g.is_translation_only() {
            return (y, x);
        }
        let (cy, cx) = self.centre;
        let (sin, cos) = g.rotation.sin_cos();
        let (ry, rx) = (y - cy, x - cx);
        (
            cy + g.scale * (sin * rx + cos * ry),
            cx + g.scale * (cos * rx - sin * ry),
        )
    }

    /// Resample a plane into reference space.
    pub fn apply(&self, plane: &Array2<f32>) -> Array2<f32> {
        let (h, w) = plane.dim();
        let view = plane.view();
        let mut out = Array2::<f32>::zeros((h, w));

        let fill_row = |row: usize, mut out_row: ndarray::ArrayViewMut1<f32>| {
            for (col, v) in out_row.iter_mut().enumerate() {
                let (y, x) = self.source_position(row, col);
                *v = bilinear_sample(&view, y, x);
            }
        };

        let zip = Zip::indexed(out.rows_mut());
        if h * w >= PARALLEL_PIXEL_THRESHOLD {
            zip.par_for_each(fill_row);
        } else {
            zip.for_each(fill_row);
        }
        out
    }
}

/// Warp a plane by a complete alignment transform in one resampling pass.
pub fn warp_plane(plane: &Array2<f32>, transform: &AlignmentTransform) -> Array2<f32> {
    let (h, w) = plane.dim();
    Warp::new(transform, h, w).apply(plane)
}

/// Dense view of a sparse tile shift field: bilinear interpolation between
/// tile-centre control points, zero for tiles without an entry.
pub struct ShiftSurface<'a> {
    field: &'a LocalShiftField,
    row_centres: Vec<f64>,
    col_centres: Vec<f64>,
}

impl<'a> ShiftSurface<'a> {
    pub fn new(field: &'a LocalShiftField) -> Self {
        Self {
            row_centres: tile_centres(field.frame_height, field.tile_size),
            col_centres: tile_centres(field.frame_width, field.tile_size),
            field,
        }
    }

    /// Interpolated residual `(dy, dx)` at a pixel.
    pub fn at(&self, row: usize, col: usize) -> (f64, f64) {
        let (r0, r1, fy) = find_interval(&self.row_centres, row as f64);
        let (c0, c1, fx) = find_interval(&self.col_centres, col as f64);

        let shift = |r: usize, c: usize| {
            self.field
                .shifts
                .get(&TileCoord { row: r, col: c })
                .map_or((0.0, 0.0), |s| (s.dy, s.dx))
        };
        let (dy00, dx00) = shift(r0, c0);
        let (dy01, dx01) = shift(r0, c1);
        let (dy10, dx10) = shift(r1, c0);
        let (dy11, dx11) = shift(r1, c1);

        let blend = |a: f64, b: f64, c: f64, d: f64| {
            a * (1.0 - fx) * (1.0 - fy) + b * fx * (1.0 - fy) + c * (1.0 - fx) * fy + d * fx * fy
        };
        (blend(dy00, dy01, dy10, dy11), blend(dx00, dx01, dx10, dx11))
    }
}

/// Centres of the tiles along one axis, boundary tile clipped to the frame.
fn tile_centres(extent: usize, tile_size: usize) -> Vec<f64> {
    (0..extent.div_ceil(tile_size))
        .map(|i| {
            let start = i * tile_size;
            let len = tile_size.min(extent - start);
            start as f64 + (len as f64 - 1.0) / 2.0
        })
        .collect()
}

/// Bracketing interval and interpolation fraction for `val` in sorted
/// `positions`; values beyond either end clamp to the end point.
fn find_interval(positions: &[f64], val: f64) -> (usize, usize, f64) {
    let n = positions.len();
    if n == 0 || val <= positions[0] {
        return (0, 0, 0.0);
    }
    if val >= positions[n - 1] {
        return (n - 1, n - 1, 0.0);
    }
    let hi = positions.partition_point(|&p| p <= val);
    let lo = hi - 1;
    let span = positions[hi] - positions[lo];
    let frac = if span > 0.0 {
        (val - positions[lo]) / span
    } else {
        0.0
    };
    (lo, hi, frac)
}
