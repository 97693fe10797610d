use serde::{Deserialize, Serialize};

/// Points per snapshot in the 33-point body topology
pub const LANDMARK_COUNT: usize = 33;

/// A body keypoint in normalized frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default = "full_visibility")]
    pub visibility: f64,
}

fn full_visibility() -> f64 {
    1.0
}

impl Landmark {
    pub fn new(x: f64, y: f64, visibility: f64) -> Self {
        Self { x, y, visibility }
    }
}

/// Named points the fall metrics read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPoint {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftAnkle,
    RightAnkle,
}

impl BodyPoint {
    /// Points whose mean visibility gates a frame
    pub const CORE: [BodyPoint; 5] = [
        BodyPoint::Nose,
        BodyPoint::LeftShoulder,
        BodyPoint::RightShoulder,
        BodyPoint::LeftHip,
        BodyPoint::RightHip,
    ];

    /// Points spanning the body's bounding extent
    pub const EXTENT: [BodyPoint; 7] = [
        BodyPoint::Nose,
        BodyPoint::LeftShoulder,
        BodyPoint::RightShoulder,
        BodyPoint::LeftHip,
        BodyPoint::RightHip,
        BodyPoint::LeftAnkle,
        BodyPoint::RightAnkle,
    ];

    pub fn index(self) -> usize {
        match self {
            BodyPoint::Nose => 0,
            BodyPoint::LeftShoulder => 11,
            BodyPoint::RightShoulder => 12,
            BodyPoint::LeftHip => 23,
            BodyPoint::RightHip => 24,
            BodyPoint::LeftAnkle => 27,
            BodyPoint::RightAnkle => 28,
        }
    }
}

/// Per-frame output of a pose estimator
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSnapshot {
    points: Vec<Landmark>,
    frame_width: u32,
    frame_height: u32,
}

impl LandmarkSnapshot {
    pub fn new(points: Vec<Landmark>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            points,
            frame_width,
            frame_height,
        }
    }

    /// Snapshot with only the named points set; everything else is invisible
    pub fn from_named(points: &[(BodyPoint, Landmark)], frame_width: u32, frame_height: u32) -> Self {
        let mut all = vec![Landmark::new(0.0, 0.0, 0.0); LANDMARK_COUNT];
        for (point, landmark) in points {
            all[point.index()] = *landmark;
        }
        Self::new(all, frame_width, frame_height)
    }

    pub fn get(&self, point: BodyPoint) -> Option<&Landmark> {
        self.points.get(point.index())
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }
}
