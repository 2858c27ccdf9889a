use std::collections::HashSet;
use std::sync::Mutex;

use ndarray::Array2;

use planetary_core::error::{Result, StackerError};
use planetary_core::frame::Frame;
use planetary_core::pipeline::ProgressSink;
use planetary_core::source::{FrameSource, MemoryFrameSource};

/// Textured disc ("planet") with a soft limb, evaluated at continuous
/// image coordinates relative to its centre `(u, v)`.
pub fn planet_value(u: f64, v: f64, radius: f64) -> f32 {
    let r = (u * u + v * v).sqrt();
    let limb = ((radius - r) / 2.0).clamp(0.0, 1.0);
    if limb == 0.0 {
        return 0.02;
    }

    let bands = 0.07 * (0.31 * u + 0.12 * v).sin()
        + 0.05 * (0.07 * u - 0.23 * v).sin()
        + 0.045 * (0.17 * u + 0.19 * v).cos()
        + 0.035 * (0.41 * v - 0.05 * u).sin();

    let spots = [
        (-8.0, -5.0, 2.0, 0.2),
        (10.0, 4.0, 1.5, -0.15),
        (3.0, 12.0, 2.5, 0.15),
        (-12.0, 9.0, 1.8, 0.18),
        (6.0, -13.0, 1.6, -0.12),
    ]
    .iter()
    .map(|&(sx, sy, sigma, amp)| {
        let d2 = (u - sx).powi(2) + (v - sy).powi(2);
        amp * (-d2 / (2.0 * sigma * sigma)).exp()
    })
    .sum::<f64>();

    (0.02 + limb * (0.55 + bands + spots)).clamp(0.0, 1.0) as f32
}

/// Planet centred in an `h x w` frame with its content displaced by `(dx, dy)`.
pub fn shifted_planet(h: usize, w: usize, dx: f64, dy: f64) -> Array2<f32> {
    let cy = (h as f64 - 1.0) / 2.0;
    let cx = (w as f64 - 1.0) / 2.0;
    let radius = h.min(w) as f64 * 0.32;
    Array2::from_shape_fn((h, w), |(r, c)| {
        planet_value(c as f64 - dx - cx, r as f64 - dy - cy, radius)
    })
}

/// Planet rotated by `angle` radians about the frame centre.
pub fn rotated_planet(h: usize, w: usize, angle: f64) -> Array2<f32> {
    let cy = (h as f64 - 1.0) / 2.0;
    let cx = (w as f64 - 1.0) / 2.0;
    let radius = h.min(w) as f64 * 0.32;
    let (sin, cos) = angle.sin_cos();
    Array2::from_shape_fn((h, w), |(r, c)| {
        let (x, y) = (c as f64 - cx, r as f64 - cy);
        // Inverse rotation: where this pixel came from in the unrotated scene.
        let u = cos * x + sin * y;
        let v = -sin * x + cos * y;
        planet_value(u, v, radius)
    })
}

/// Repeated 3x3 box blur with clamped borders.
pub fn box_blur(data: &Array2<f32>, passes: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut current = data.clone();
    for _ in 0..passes {
        let src = current.clone();
        for r in 0..h {
            for c in 0..w {
                let mut sum = 0.0f32;
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        let rr = (r as i64 + dr).clamp(0, h as i64 - 1) as usize;
                        let cc = (c as i64 + dc).clamp(0, w as i64 - 1) as usize;
                        sum += src[[rr, cc]];
                    }
                }
                current[[r, c]] = sum / 9.0;
            }
        }
    }
    current
}

/// In-memory mono source from planes.
pub fn mono_source(planes: Vec<Array2<f32>>) -> MemoryFrameSource {
    MemoryFrameSource::new(
        planes
            .into_iter()
            .enumerate()
            .map(|(i, p)| Frame::mono(i, p))
            .collect(),
    )
}

/// Small integer jitter pattern, the same for every run.
pub fn jitter(i: usize) -> (f64, f64) {
    (((i * 7) % 5) as f64 - 2.0, ((i * 3) % 5) as f64 - 2.0)
}

/// Source whose listed indices always fail to decode.
pub struct FlakySource {
    pub inner: MemoryFrameSource,
    pub failing: HashSet<usize>,
}

impl FrameSource for FlakySource {
    fn total_frames(&self) -> usize {
        self.inner.total_frames()
    }

    fn decode(&self, index: usize) -> Result<Frame> {
        if self.failing.contains(&index) {
            return Err(StackerError::DecodeFailure {
                index,
                reason: "corrupt frame".into(),
            });
        }
        self.inner.decode(index)
    }
}

/// Progress sink that records every notification.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(u32, String)>>,
}

impl RecordingSink {
    pub fn percents(&self) -> Vec<u32> {
        self.events.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub fn last(&self) -> Option<(u32, String)> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl ProgressSink for RecordingSink {
    fn notify(&self, percent: u32, message: &str) {
        self.events.lock().unwrap().push((percent, message.to_string()));
    }
}

/// Route library logs to the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
