use super::*;
use crate::config::CooldownPolicy;
use crate::frame::FrameData;
use std::time::{Duration, Instant, SystemTime};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const FRAME_STEP: Duration = Duration::from_millis(33);

fn pose(points: [(f64, f64); 7], visibility: f64) -> LandmarkSnapshot {
    let named: Vec<(BodyPoint, Landmark)> = BodyPoint::EXTENT
        .iter()
        .zip(points.iter())
        .map(|(p, (x, y))| (*p, Landmark::new(*x, *y, visibility)))
        .collect();
    LandmarkSnapshot::from_named(&named, WIDTH, HEIGHT)
}

/// Upright subject, aspect ratio about 6
fn standing() -> LandmarkSnapshot {
    pose(
        [
            (0.50, 0.20),
            (0.45, 0.30),
            (0.55, 0.30),
            (0.46, 0.50),
            (0.54, 0.50),
            (0.47, 0.80),
            (0.53, 0.80),
        ],
        0.9,
    )
}

/// Subject flat on the floor in the lower part of the frame
fn lying() -> LandmarkSnapshot {
    pose(
        [
            (0.20, 0.78),
            (0.29, 0.79),
            (0.31, 0.81),
            (0.54, 0.81),
            (0.56, 0.83),
            (0.80, 0.84),
            (0.82, 0.85),
        ],
        0.9,
    )
}

/// Aspect ratio about 2 (a third of standing), torso tilted about 10 degrees,
/// center above the low band: only ratio collapse and tilt fire.
fn slumped() -> LandmarkSnapshot {
    pose(
        [
            (0.25, 0.40),
            (0.29, 0.44),
            (0.31, 0.46),
            (0.49, 0.49),
            (0.51, 0.51),
            (0.45, 0.92),
            (0.47, 0.92),
        ],
        0.9,
    )
}

fn calibrated(settings: ClassifierSettings) -> (FallClassifier, Instant) {
    let mut classifier = FallClassifier::new(settings);
    let mut at = Instant::now();
    for _ in 0..30 {
        let result = classifier.classify(Some(&standing()), at);
        assert_eq!(result, Classification::NONE);
        at += FRAME_STEP;
    }
    assert_eq!(classifier.phase(), ClassifierPhase::Active);
    (classifier, at)
}

#[test]
fn test_metrics_for_standing_subject() {
    let metrics = BodyMetrics::from_snapshot(&standing(), 0.5).unwrap();

    assert!((metrics.aspect_ratio - 6.0).abs() < 1e-3);
    assert!((metrics.tilt_degrees - 90.0).abs() < 1e-9);
    assert!((metrics.center_y - 0.4).abs() < 1e-9);
    assert!((metrics.head_y - 0.2).abs() < 1e-9);
    assert!((metrics.core_visibility - 0.9).abs() < 1e-9);
}

#[test]
fn test_tilt_is_symmetric_for_head_left_or_right() {
    let right = BodyMetrics::from_snapshot(&lying(), 0.5).unwrap();

    let mirrored_points: Vec<Landmark> = lying()
        .points()
        .iter()
        .map(|l| Landmark::new(1.0 - l.x, l.y, l.visibility))
        .collect();
    let mirrored = LandmarkSnapshot::new(mirrored_points, WIDTH, HEIGHT);
    let left = BodyMetrics::from_snapshot(&mirrored, 0.5).unwrap();

    assert!(right.tilt_degrees < 5.0);
    assert!((right.tilt_degrees - left.tilt_degrees).abs() < 1e-9);
}

#[test]
fn test_low_visibility_yields_no_metrics() {
    let faint = pose(
        [
            (0.5, 0.2),
            (0.45, 0.3),
            (0.55, 0.3),
            (0.46, 0.5),
            (0.54, 0.5),
            (0.47, 0.8),
            (0.53, 0.8),
        ],
        0.4,
    );
    assert!(BodyMetrics::from_snapshot(&faint, 0.5).is_none());

    let truncated = LandmarkSnapshot::new(vec![Landmark::new(0.5, 0.5, 1.0); 5], WIDTH, HEIGHT);
    assert!(BodyMetrics::from_snapshot(&truncated, 0.5).is_none());
}

#[test]
fn test_aspect_ratio_defaults_with_few_visible_points() {
    let snapshot = LandmarkSnapshot::from_named(
        &[
            (BodyPoint::Nose, Landmark::new(0.5, 0.1, 1.0)),
            (BodyPoint::LeftShoulder, Landmark::new(0.4, 0.3, 1.0)),
            (BodyPoint::RightShoulder, Landmark::new(0.6, 0.3, 0.3)),
            (BodyPoint::LeftHip, Landmark::new(0.45, 0.6, 0.3)),
            (BodyPoint::RightHip, Landmark::new(0.55, 0.6, 0.5)),
        ],
        WIDTH,
        HEIGHT,
    );

    let metrics = BodyMetrics::from_snapshot(&snapshot, 0.5).unwrap();
    assert_eq!(metrics.aspect_ratio, 1.0);
}

#[test]
fn test_history_is_a_bounded_ring() {
    let metrics = BodyMetrics::from_snapshot(&standing(), 0.5).unwrap();
    let mut history = DetectionHistory::new(3);
    let start = Instant::now();

    for i in 0..5 {
        history.push(metrics, start + FRAME_STEP * i);
    }

    assert_eq!(history.len(), 3);
    assert_eq!(history.latest().unwrap().at, start + FRAME_STEP * 4);
}

#[test]
fn test_vertical_velocity() {
    let base = BodyMetrics::from_snapshot(&standing(), 0.5).unwrap();
    let mut history = DetectionHistory::new(30);
    let start = Instant::now();

    for i in 0..5u32 {
        let metrics = BodyMetrics {
            center_y: 0.4 + 0.1 * i as f64,
            ..base
        };
        history.push(metrics, start + Duration::from_millis(100) * i);
    }

    let velocity = history.vertical_velocity(5).unwrap();
    assert!((velocity - 1.0).abs() < 1e-9);
    assert!(history.vertical_velocity(6).is_none());
}

#[test]
fn test_indicators_are_additive_and_capped() {
    let lying_metrics = BodyMetrics::from_snapshot(&lying(), 0.5).unwrap();
    let all = Indicators::evaluate(&lying_metrics, Some(6.0), Some(2.0), 0.5);
    assert!(all.ratio_collapse);
    assert!(all.horizontal_posture);
    assert!(all.horizontal_tilt);
    assert!(all.downward_velocity);
    assert!(all.low_position);
    assert_eq!(all.confidence(), 1.0);

    let standing_metrics = BodyMetrics::from_snapshot(&standing(), 0.5).unwrap();
    let none = Indicators::evaluate(&standing_metrics, Some(6.0), Some(0.0), 0.5);
    assert_eq!(none, Indicators::default());
    assert_eq!(none.confidence(), 0.0);
}

#[test]
fn test_ratio_collapse_needs_calibration() {
    let metrics = BodyMetrics::from_snapshot(&slumped(), 0.5).unwrap();

    let uncalibrated = Indicators::evaluate(&metrics, None, None, 0.5);
    assert!(!uncalibrated.ratio_collapse);

    let calibrated = Indicators::evaluate(&metrics, Some(6.0), None, 0.5);
    assert!(calibrated.ratio_collapse);
}

#[test]
fn test_calibration_completes_after_k_frames() {
    let mut classifier = FallClassifier::new(ClassifierSettings::default());
    let mut at = Instant::now();

    for i in 0..29 {
        classifier.classify(Some(&standing()), at);
        assert_eq!(
            classifier.phase(),
            ClassifierPhase::Calibrating { frames_seen: i + 1 }
        );
        at += FRAME_STEP;
    }

    classifier.classify(Some(&standing()), at);
    assert_eq!(classifier.phase(), ClassifierPhase::Active);
    assert!((classifier.standing_ratio().unwrap() - 6.0).abs() < 1e-3);
}

#[test]
fn test_calibration_without_upright_samples_still_activates() {
    let mut classifier = FallClassifier::new(ClassifierSettings::default());
    let mut at = Instant::now();

    for _ in 0..30 {
        assert_eq!(classifier.classify(Some(&lying()), at), Classification::NONE);
        at += FRAME_STEP;
    }

    assert_eq!(classifier.phase(), ClassifierPhase::Active);
    assert!(classifier.standing_ratio().is_none());

    // Horizontal posture, tilt and low position still add up past 0.7
    let result = classifier.classify(Some(&lying()), at + Duration::from_secs(1));
    assert!(result.is_fall);
    assert!(result.confidence >= 0.8 - 1e-9);
}

#[test]
fn test_missing_subject_is_not_recorded() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());
    let before = classifier.history_len();

    assert_eq!(classifier.classify(None, at), Classification::NONE);

    let faint = pose([(0.5, 0.5); 7], 0.2);
    assert_eq!(classifier.classify(Some(&faint), at), Classification::NONE);

    assert_eq!(classifier.history_len(), before);
}

#[test]
fn test_upright_subject_is_not_a_fall() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());

    let result = classifier.classify(Some(&standing()), at);
    assert_eq!(result, Classification::NONE);
}

#[test]
fn test_ratio_collapse_plus_tilt_meets_threshold() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());

    let result = classifier.classify(Some(&slumped()), at + Duration::from_secs(5));

    assert!(result.is_fall);
    assert!((result.confidence - 0.7).abs() < 1e-9);
}

#[test]
fn test_below_threshold_reports_confidence_without_fall() {
    let settings = ClassifierSettings {
        confidence_threshold: 0.9,
        ..ClassifierSettings::default()
    };
    let (mut classifier, at) = calibrated(settings);

    let result = classifier.classify(Some(&slumped()), at + Duration::from_secs(5));

    assert!(!result.is_fall);
    assert!((result.confidence - 0.7).abs() < 1e-9);
}

#[test]
fn test_cooldown_suppresses_second_detection() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());
    let first_at = at + Duration::from_secs(5);

    let first = classifier.classify(Some(&lying()), first_at);
    assert!(first.is_fall);

    let second = classifier.classify(Some(&lying()), first_at + Duration::from_secs(1));
    assert_eq!(second, Classification::NONE);
    assert!(classifier.last_raw_confidence() > 0.0);
    assert_eq!(classifier.suppressed_count(), 1);

    let third = classifier.classify(Some(&lying()), first_at + Duration::from_secs(6));
    assert!(third.is_fall);
}

#[test]
fn test_suppressed_detection_does_not_restart_cooldown() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());
    let first_at = at + Duration::from_secs(5);

    assert!(classifier.classify(Some(&lying()), first_at).is_fall);
    assert!(!classifier
        .classify(Some(&lying()), first_at + Duration::from_secs(4))
        .is_fall);
    assert!(classifier
        .classify(Some(&lying()), first_at + Duration::from_millis(5100))
        .is_fall);
}

#[test]
fn test_clear_velocity_history_policy() {
    let settings = ClassifierSettings {
        cooldown_policy: CooldownPolicy::ClearVelocityHistory,
        ..ClassifierSettings::default()
    };
    let (mut classifier, at) = calibrated(settings);

    assert!(classifier.classify(Some(&lying()), at).is_fall);
    classifier.classify(Some(&lying()), at + Duration::from_secs(1));

    assert_eq!(classifier.history_len(), 0);
    assert_eq!(classifier.phase(), ClassifierPhase::Active);
}

#[test]
fn test_recalibrate_policy() {
    let settings = ClassifierSettings {
        cooldown_policy: CooldownPolicy::Recalibrate,
        ..ClassifierSettings::default()
    };
    let (mut classifier, at) = calibrated(settings);

    assert!(classifier.classify(Some(&lying()), at).is_fall);
    classifier.classify(Some(&lying()), at + Duration::from_secs(1));

    assert_eq!(
        classifier.phase(),
        ClassifierPhase::Calibrating { frames_seen: 0 }
    );
    assert!(classifier.standing_ratio().is_none());
}

#[test]
fn test_keep_history_policy_leaves_state() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());

    assert!(classifier.classify(Some(&lying()), at).is_fall);
    let before = classifier.history_len();
    classifier.classify(Some(&lying()), at + Duration::from_secs(1));

    assert_eq!(classifier.history_len(), (before + 1).min(30));
    assert!(classifier.standing_ratio().is_some());
}

#[test]
fn test_reset_returns_to_calibrating() {
    let (mut classifier, at) = calibrated(ClassifierSettings::default());
    assert!(classifier.classify(Some(&lying()), at).is_fall);

    classifier.reset();

    assert_eq!(
        classifier.phase(),
        ClassifierPhase::Calibrating { frames_seen: 0 }
    );
    assert_eq!(classifier.history_len(), 0);
    assert!(classifier.standing_ratio().is_none());
}

#[test]
fn test_attached_estimator_reads_frame_landmarks() {
    let mut estimator = AttachedLandmarks;
    let bare = FrameData::new(1, SystemTime::now(), vec![0xFF, 0xD8, 0xFF, 0xD9], WIDTH, HEIGHT);
    assert!(estimator.estimate(&bare).is_none());

    let annotated = bare.with_landmarks(standing());
    assert_eq!(estimator.estimate(&annotated), Some(standing()));

    let mut none = NullEstimator;
    assert!(none.estimate(&annotated).is_none());
}
