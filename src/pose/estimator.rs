use super::LandmarkSnapshot;
use crate::config::EstimatorKind;
use crate::frame::FrameData;

/// Seam to the external landmark estimator.
///
/// Returning `None` means no usable subject in the frame, which the classifier
/// treats as an ordinary non-fall frame.
pub trait PoseEstimator: Send {
    fn name(&self) -> &str;

    fn estimate(&mut self, frame: &FrameData) -> Option<LandmarkSnapshot>;
}

/// Reads landmarks that the frame producer attached to the frame
#[derive(Debug, Default)]
pub struct AttachedLandmarks;

impl PoseEstimator for AttachedLandmarks {
    fn name(&self) -> &str {
        "attached"
    }

    fn estimate(&mut self, frame: &FrameData) -> Option<LandmarkSnapshot> {
        frame.landmarks.as_deref().cloned()
    }
}

/// Never finds a subject
#[derive(Debug, Default)]
pub struct NullEstimator;

impl PoseEstimator for NullEstimator {
    fn name(&self) -> &str {
        "none"
    }

    fn estimate(&mut self, _frame: &FrameData) -> Option<LandmarkSnapshot> {
        None
    }
}

pub fn build_estimator(kind: EstimatorKind) -> Box<dyn PoseEstimator> {
    match kind {
        EstimatorKind::Attached => Box::new(AttachedLandmarks),
        EstimatorKind::None => Box::new(NullEstimator),
    }
}
