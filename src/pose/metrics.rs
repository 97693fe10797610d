use super::{BodyPoint, Landmark, LandmarkSnapshot};
use std::collections::VecDeque;
use std::time::Instant;

const EXTENT_EPSILON: f64 = 1e-6;

/// Measurements derived from one landmark snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyMetrics {
    /// Height over width of the visible extent points
    pub aspect_ratio: f64,
    /// Elevation of the hip-to-shoulder line above horizontal, 0..=90 degrees
    pub tilt_degrees: f64,
    /// Normalized vertical position of the torso center (0 = top)
    pub center_y: f64,
    /// Normalized vertical position of the nose
    pub head_y: f64,
    /// Mean visibility of the core points
    pub core_visibility: f64,
}

impl BodyMetrics {
    /// Derive metrics, or `None` when the core points are not visible enough
    /// (or missing from the snapshot).
    pub fn from_snapshot(snapshot: &LandmarkSnapshot, min_visibility: f64) -> Option<Self> {
        let core = collect(snapshot, &BodyPoint::CORE)?;
        let core_visibility =
            core.iter().map(|l| l.visibility).sum::<f64>() / core.len() as f64;
        if core_visibility <= min_visibility {
            return None;
        }

        let nose = snapshot.get(BodyPoint::Nose)?;
        let shoulders = midpoint(
            snapshot.get(BodyPoint::LeftShoulder)?,
            snapshot.get(BodyPoint::RightShoulder)?,
        );
        let hips = midpoint(
            snapshot.get(BodyPoint::LeftHip)?,
            snapshot.get(BodyPoint::RightHip)?,
        );

        Some(Self {
            aspect_ratio: aspect_ratio(snapshot, min_visibility),
            tilt_degrees: tilt_degrees(shoulders, hips, snapshot.frame_size()),
            center_y: (shoulders.1 + hips.1) / 2.0,
            head_y: nose.y,
            core_visibility,
        })
    }
}

fn collect<'a>(snapshot: &'a LandmarkSnapshot, points: &[BodyPoint]) -> Option<Vec<&'a Landmark>> {
    points.iter().map(|p| snapshot.get(*p)).collect()
}

fn midpoint(a: &Landmark, b: &Landmark) -> (f64, f64) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Extent over visible points; fewer than three visible points read as square.
fn aspect_ratio(snapshot: &LandmarkSnapshot, min_visibility: f64) -> f64 {
    let visible: Vec<&Landmark> = BodyPoint::EXTENT
        .iter()
        .filter_map(|p| snapshot.get(*p))
        .filter(|l| l.visibility > min_visibility)
        .collect();

    if visible.len() <= 2 {
        return 1.0;
    }

    let (mut min_x, mut max_x) = (f64::MAX, f64::MIN);
    let (mut min_y, mut max_y) = (f64::MAX, f64::MIN);
    for l in &visible {
        min_x = min_x.min(l.x);
        max_x = max_x.max(l.x);
        min_y = min_y.min(l.y);
        max_y = max_y.max(l.y);
    }

    (max_y - min_y) / (max_x - min_x + EXTENT_EPSILON)
}

/// Angle in pixel space so non-square frames do not skew it.
fn tilt_degrees(shoulders: (f64, f64), hips: (f64, f64), frame: (u32, u32)) -> f64 {
    let dx = ((shoulders.0 - hips.0) * frame.0 as f64).abs();
    let dy = ((shoulders.1 - hips.1) * frame.1 as f64).abs();
    if dx == 0.0 && dy == 0.0 {
        return 90.0;
    }
    dy.atan2(dx).to_degrees()
}

#[derive(Debug, Clone, Copy)]
pub struct HistorySample {
    pub metrics: BodyMetrics,
    pub at: Instant,
}

/// Fixed-capacity ring of recent qualifying frames
#[derive(Debug, Clone)]
pub struct DetectionHistory {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, metrics: BodyMetrics, at: Instant) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(HistorySample { metrics, at });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    /// Vertical center velocity over the last `window` samples, in frame
    /// heights per second. Positive means moving down the frame.
    pub fn vertical_velocity(&self, window: usize) -> Option<f64> {
        if window < 2 || self.samples.len() < window {
            return None;
        }
        let first = &self.samples[self.samples.len() - window];
        let last = self.samples.back()?;
        let dt = last.at.checked_duration_since(first.at)?.as_secs_f64();
        if dt <= 0.0 {
            return None;
        }
        Some((last.metrics.center_y - first.metrics.center_y) / dt)
    }
}
