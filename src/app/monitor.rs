use super::state::SharedState;
use crate::clip::ClipAssembler;
use crate::dispatch::{EventDispatcher, FallEvent};
use crate::events::{EventBus, FallwatchEvent};
use crate::frame::{placeholder_frame, FrameData};
use crate::pose::{Classification, FallClassifier, PoseEstimator};
use crate::source::FrameSource;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one monitor step did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// No new frame yet and the source is still live
    Idle,
    /// Source silent; the dashboard got the placeholder
    Placeholder,
    Classified(Classification),
    FallDetected { event_id: Uuid, confidence: f64 },
}

/// The capture, classify, buffer and dispatch loop.
///
/// Owns the classifier and estimator outright; everything else it touches is
/// shared through handles that never block on network I/O.
pub struct DetectionMonitor {
    source: Arc<dyn FrameSource>,
    estimator: Box<dyn PoseEstimator>,
    classifier: FallClassifier,
    assembler: Arc<ClipAssembler>,
    dispatcher: Arc<EventDispatcher>,
    state: Arc<SharedState>,
    event_bus: EventBus,
    device_id: String,
    frame_interval: Duration,
    placeholder: FrameData,
    was_receiving: bool,
}

impl DetectionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn FrameSource>,
        estimator: Box<dyn PoseEstimator>,
        classifier: FallClassifier,
        assembler: Arc<ClipAssembler>,
        dispatcher: Arc<EventDispatcher>,
        state: Arc<SharedState>,
        event_bus: EventBus,
        device_id: impl Into<String>,
        frame_interval: Duration,
        resolution: (u32, u32),
    ) -> Self {
        Self {
            source,
            estimator,
            classifier,
            assembler,
            dispatcher,
            state,
            event_bus,
            device_id: device_id.into(),
            frame_interval,
            placeholder: placeholder_frame(resolution.0, resolution.1),
            was_receiving: false,
        }
    }

    /// Handle at most one frame; never waits for the source.
    pub fn step(&mut self, now: Instant) -> StepOutcome {
        let receiving = self.source.is_receiving();
        if receiving != self.was_receiving {
            self.was_receiving = receiving;
            if receiving {
                info!("Frame source is receiving");
            } else {
                warn!("Frame source went silent, showing placeholder");
            }
            let _ = self.event_bus.publish(FallwatchEvent::SourceStatusChanged {
                receiving,
                timestamp: SystemTime::now(),
            });
        }

        match self.source.get_frame() {
            Some(frame) => self.process(frame, now),
            None if !receiving => {
                let mut placeholder = self.placeholder.clone();
                placeholder.timestamp = SystemTime::now();
                self.state.set_latest_frame(placeholder);
                self.state.update_detection(|d| d.placeholder_frames += 1);
                StepOutcome::Placeholder
            }
            None => StepOutcome::Idle,
        }
    }

    fn process(&mut self, frame: FrameData, now: Instant) -> StepOutcome {
        self.state.set_latest_frame(frame.clone());

        let landmarks = self.estimator.estimate(&frame);
        let result = self.classifier.classify(landmarks.as_ref(), now);
        self.assembler.add_frame(frame);

        let outcome = if result.is_fall {
            let event_id = self.on_fall(result.confidence);
            StepOutcome::FallDetected {
                event_id,
                confidence: result.confidence,
            }
        } else {
            StepOutcome::Classified(result)
        };

        let phase = self.classifier.phase();
        let suppressed = self.classifier.suppressed_count();
        let clip = self.assembler.status();
        self.state.update_detection(|d| {
            d.frames_processed += 1;
            d.set_phase(phase);
            d.suppressed = suppressed;
            d.last_confidence = result.confidence;
            d.clip = clip;
        });

        outcome
    }

    fn on_fall(&mut self, confidence: f64) -> Uuid {
        let pending = self.assembler.trigger();
        let clip_path = pending.as_ref().map(|p| p.path().to_path_buf());
        if clip_path.is_none() {
            debug!("Clip already recording, fall shares it");
        }

        let event = FallEvent::detected(confidence, self.device_id.clone(), clip_path.clone());
        let event_id = event.id();
        warn!(
            event_id = %event_id,
            confidence,
            clip = ?clip_path,
            "Fall detected"
        );

        self.state.record_event(event.clone());
        self.state.update_detection(|d| {
            d.falls_detected += 1;
            d.last_fall = Some(Utc::now());
            if clip_path.is_some() {
                d.last_clip = clip_path;
            }
        });
        let _ = self.event_bus.publish(FallwatchEvent::FallDetected {
            event_id,
            confidence,
            timestamp: SystemTime::now(),
        });

        self.dispatcher.spawn_dispatch(event, pending);
        event_id
    }

    pub fn classifier(&self) -> &FallClassifier {
        &self.classifier
    }

    /// Poll at the frame interval until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            estimator = self.estimator.name(),
            interval_ms = self.frame_interval.as_millis() as u64,
            "Detection monitor started"
        );

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.step(Instant::now());
                }
            }
        }

        info!(
            frames = self.state.detection().frames_processed,
            "Detection monitor stopped"
        );
    }
}
