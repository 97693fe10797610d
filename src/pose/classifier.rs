use super::{BodyMetrics, DetectionHistory, LandmarkSnapshot};
use crate::config::{CooldownPolicy, DetectionConfig};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Aspect ratio above which a calibration frame counts as upright
const UPRIGHT_ASPECT: f64 = 1.2;
const CALIBRATION_SMOOTHING: f64 = 0.9;

const RATIO_COLLAPSE: f64 = 0.5;
const HORIZONTAL_ASPECT: f64 = 0.8;
const HORIZONTAL_TILT_DEGREES: f64 = 45.0;
const LOW_POSITION_Y: f64 = 0.6;
const VELOCITY_WINDOW: usize = 5;

const RATIO_COLLAPSE_WEIGHT: f64 = 0.4;
const HORIZONTAL_POSTURE_WEIGHT: f64 = 0.3;
const HORIZONTAL_TILT_WEIGHT: f64 = 0.3;
const DOWNWARD_VELOCITY_WEIGHT: f64 = 0.4;
const LOW_POSITION_WEIGHT: f64 = 0.2;

/// Float slack so weight sums like 0.4 + 0.3 meet a 0.7 threshold
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub confidence_threshold: f64,
    pub cooldown: Duration,
    pub calibration_frames: usize,
    pub history_capacity: usize,
    pub min_visibility: f64,
    pub velocity_threshold: f64,
    pub cooldown_policy: CooldownPolicy,
}

impl From<&DetectionConfig> for ClassifierSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            cooldown: Duration::from_secs_f64(config.cooldown_seconds),
            calibration_frames: config.calibration_frames,
            history_capacity: config.history_capacity,
            min_visibility: config.min_visibility,
            velocity_threshold: config.velocity_threshold,
            cooldown_policy: config.cooldown_policy,
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierPhase {
    Calibrating { frames_seen: usize },
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub is_fall: bool,
    pub confidence: f64,
}

impl Classification {
    pub const NONE: Classification = Classification {
        is_fall: false,
        confidence: 0.0,
    };
}

/// Which fall indicators fired for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Indicators {
    pub ratio_collapse: bool,
    pub horizontal_posture: bool,
    pub horizontal_tilt: bool,
    pub downward_velocity: bool,
    pub low_position: bool,
}

impl Indicators {
    /// Every indicator is checked independently; weights add up.
    pub fn evaluate(
        metrics: &BodyMetrics,
        standing_ratio: Option<f64>,
        velocity: Option<f64>,
        velocity_threshold: f64,
    ) -> Self {
        Self {
            ratio_collapse: standing_ratio
                .filter(|s| *s > 0.0)
                .map(|s| metrics.aspect_ratio / s < RATIO_COLLAPSE)
                .unwrap_or(false),
            horizontal_posture: metrics.aspect_ratio < HORIZONTAL_ASPECT,
            horizontal_tilt: metrics.tilt_degrees < HORIZONTAL_TILT_DEGREES,
            downward_velocity: velocity.map(|v| v > velocity_threshold).unwrap_or(false),
            low_position: metrics.center_y > LOW_POSITION_Y,
        }
    }

    /// Weighted sum capped at 1.0
    pub fn confidence(&self) -> f64 {
        let weighted = [
            (self.ratio_collapse, RATIO_COLLAPSE_WEIGHT),
            (self.horizontal_posture, HORIZONTAL_POSTURE_WEIGHT),
            (self.horizontal_tilt, HORIZONTAL_TILT_WEIGHT),
            (self.downward_velocity, DOWNWARD_VELOCITY_WEIGHT),
            (self.low_position, LOW_POSITION_WEIGHT),
        ];
        let sum: f64 = weighted
            .iter()
            .filter(|(fired, _)| *fired)
            .map(|(_, weight)| weight)
            .sum();
        sum.min(1.0)
    }
}

/// Calibration → detection state machine with a cooldown gate on positives
#[derive(Debug)]
pub struct FallClassifier {
    settings: ClassifierSettings,
    phase: ClassifierPhase,
    standing_ratio: Option<f64>,
    history: DetectionHistory,
    last_accepted: Option<Instant>,
    last_raw_confidence: f64,
    suppressed: u64,
}

impl FallClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        let history = DetectionHistory::new(settings.history_capacity);
        let phase = Self::initial_phase(&settings);
        Self {
            settings,
            phase,
            standing_ratio: None,
            history,
            last_accepted: None,
            last_raw_confidence: 0.0,
            suppressed: 0,
        }
    }

    fn initial_phase(settings: &ClassifierSettings) -> ClassifierPhase {
        if settings.calibration_frames == 0 {
            ClassifierPhase::Active
        } else {
            ClassifierPhase::Calibrating { frames_seen: 0 }
        }
    }

    /// Classify one frame's landmarks.
    ///
    /// Frames without a subject, or whose core points are not visible enough,
    /// return `Classification::NONE` and leave all state untouched.
    pub fn classify(&mut self, snapshot: Option<&LandmarkSnapshot>, at: Instant) -> Classification {
        let Some(metrics) =
            snapshot.and_then(|s| BodyMetrics::from_snapshot(s, self.settings.min_visibility))
        else {
            return Classification::NONE;
        };

        self.history.push(metrics, at);

        if let ClassifierPhase::Calibrating { frames_seen } = self.phase {
            self.calibrate(&metrics, frames_seen + 1);
            return Classification::NONE;
        }

        let indicators = Indicators::evaluate(
            &metrics,
            self.standing_ratio,
            self.history.vertical_velocity(VELOCITY_WINDOW),
            self.settings.velocity_threshold,
        );
        let confidence = indicators.confidence();
        self.last_raw_confidence = confidence;

        trace!(?indicators, confidence, "Frame classified");

        if confidence == 0.0 {
            return Classification::NONE;
        }

        if confidence + THRESHOLD_EPSILON < self.settings.confidence_threshold {
            return Classification {
                is_fall: false,
                confidence,
            };
        }

        if let Some(last) = self.last_accepted {
            if at.saturating_duration_since(last) < self.settings.cooldown {
                self.suppressed += 1;
                debug!(
                    confidence,
                    policy = ?self.settings.cooldown_policy,
                    "Fall suppressed by cooldown"
                );
                self.apply_cooldown_policy();
                return Classification::NONE;
            }
        }

        self.last_accepted = Some(at);
        Classification {
            is_fall: true,
            confidence,
        }
    }

    fn calibrate(&mut self, metrics: &BodyMetrics, frames_seen: usize) {
        if metrics.aspect_ratio > UPRIGHT_ASPECT {
            self.standing_ratio = Some(match self.standing_ratio {
                Some(current) => {
                    CALIBRATION_SMOOTHING * current
                        + (1.0 - CALIBRATION_SMOOTHING) * metrics.aspect_ratio
                }
                None => metrics.aspect_ratio,
            });
        }

        if frames_seen >= self.settings.calibration_frames {
            self.phase = ClassifierPhase::Active;
            match self.standing_ratio {
                Some(ratio) => info!("Calibration complete, standing ratio {:.2}", ratio),
                None => info!("Calibration complete without an upright sample"),
            }
        } else {
            self.phase = ClassifierPhase::Calibrating { frames_seen };
        }
    }

    fn apply_cooldown_policy(&mut self) {
        match self.settings.cooldown_policy {
            CooldownPolicy::KeepHistory => {}
            CooldownPolicy::ClearVelocityHistory => self.history.clear(),
            CooldownPolicy::Recalibrate => self.restart_calibration(),
        }
    }

    fn restart_calibration(&mut self) {
        self.history.clear();
        self.standing_ratio = None;
        self.phase = Self::initial_phase(&self.settings);
    }

    /// Drop history, calibration and the cooldown timer
    pub fn reset(&mut self) {
        self.restart_calibration();
        self.last_accepted = None;
        self.last_raw_confidence = 0.0;
        info!("Fall classifier reset");
    }

    pub fn phase(&self) -> ClassifierPhase {
        self.phase
    }

    pub fn standing_ratio(&self) -> Option<f64> {
        self.standing_ratio
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Confidence of the most recent evaluated frame, including suppressed ones
    pub fn last_raw_confidence(&self) -> f64 {
        self.last_raw_confidence
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }
}
