mod classifier;
mod estimator;
mod landmarks;
mod metrics;
#[cfg(test)]
mod tests;

pub use classifier::{
    Classification, ClassifierPhase, ClassifierSettings, FallClassifier, Indicators,
};
pub use estimator::{build_estimator, AttachedLandmarks, NullEstimator, PoseEstimator};
pub use landmarks::{BodyPoint, Landmark, LandmarkSnapshot, LANDMARK_COUNT};
pub use metrics::{BodyMetrics, DetectionHistory, HistorySample};
