use super::activity::ActivityStatus;
use super::types::ComponentState;
use crate::clip::ClipBufferStatus;
use crate::config::SourceKind;
use crate::dispatch::{EventDispatcher, FallEvent, FallEventSummary, SinkStatus};
use crate::frame::FrameData;
use crate::pose::ClassifierPhase;
use crate::source::{FrameSource, SourceStats};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Upper bound for one event history query
pub const MAX_EVENTS_QUERY: usize = 50;

/// Detection counters, copied in by the monitor after each frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionStatus {
    pub phase: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_frames_seen: Option<usize>,
    pub falls_detected: u64,
    pub suppressed: u64,
    pub last_confidence: f64,
    pub placeholder_frames: u64,
    #[serde(skip)]
    pub frames_processed: u64,
    #[serde(skip)]
    pub last_fall: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_clip: Option<PathBuf>,
    #[serde(skip)]
    pub clip: ClipBufferStatus,
}

impl DetectionStatus {
    pub fn set_phase(&mut self, phase: ClassifierPhase) {
        match phase {
            ClassifierPhase::Calibrating { frames_seen } => {
                self.phase = "calibrating";
                self.calibration_frames_seen = Some(frames_seen);
            }
            ClassifierPhase::Active => {
                self.phase = "active";
                self.calibration_frames_seen = None;
            }
        }
    }
}

/// State written by the pipeline and read by queries.
///
/// One mutex per resource; every accessor copies in or out and returns.
pub struct SharedState {
    latest_frame: Mutex<Option<FrameData>>,
    history: Mutex<VecDeque<FallEvent>>,
    detection: Mutex<DetectionStatus>,
    activity: Mutex<ActivityStatus>,
    components: Mutex<BTreeMap<String, ComponentState>>,
    history_limit: usize,
    started_at: Instant,
}

impl SharedState {
    pub fn new(history_limit: usize) -> Self {
        let history_limit = history_limit.max(1);
        Self {
            latest_frame: Mutex::new(None),
            history: Mutex::new(VecDeque::with_capacity(history_limit)),
            detection: Mutex::new(DetectionStatus {
                phase: "calibrating",
                ..Default::default()
            }),
            activity: Mutex::new(ActivityStatus::default()),
            components: Mutex::new(BTreeMap::new()),
            history_limit,
            started_at: Instant::now(),
        }
    }

    pub fn set_latest_frame(&self, frame: FrameData) {
        *self.latest_frame.lock() = Some(frame);
    }

    pub fn latest_frame(&self) -> Option<FrameData> {
        self.latest_frame.lock().clone()
    }

    /// Newest first; the oldest entry falls off past the limit
    pub fn record_event(&self, event: FallEvent) {
        let mut history = self.history.lock();
        history.push_front(event);
        history.truncate(self.history_limit);
    }

    pub fn events(&self, limit: usize) -> Vec<FallEventSummary> {
        let events: Vec<FallEvent> = self.history.lock().iter().take(limit).cloned().collect();
        events.iter().map(FallEvent::summary).collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn update_detection<F: FnOnce(&mut DetectionStatus)>(&self, update: F) {
        update(&mut self.detection.lock());
    }

    pub fn detection(&self) -> DetectionStatus {
        self.detection.lock().clone()
    }

    pub fn update_activity<F: FnOnce(&mut ActivityStatus)>(&self, update: F) {
        update(&mut self.activity.lock());
    }

    pub fn activity(&self) -> ActivityStatus {
        self.activity.lock().clone()
    }

    pub fn set_component_state(&self, component: &str, state: ComponentState) {
        self.components.lock().insert(component.to_string(), state);
        debug!("Component '{}' state changed to: {:?}", component, state);
    }

    pub fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.components.lock().get(component).copied()
    }

    pub fn component_states(&self) -> BTreeMap<String, ComponentState> {
        self.components.lock().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSourceStatus {
    pub kind: SourceKind,
    #[serde(flatten)]
    pub stats: SourceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatusView {
    pub resolution: (u32, u32),
    pub fps: u32,
    #[serde(flatten)]
    pub clip: ClipBufferStatus,
}

/// Snapshot returned by the status query
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub device_id: String,
    pub video_source: VideoSourceStatus,
    pub camera: CameraStatusView,
    pub detection: DetectionStatus,
    pub sinks: BTreeMap<String, SinkStatus>,
    pub activity: ActivityStatus,
    pub components: BTreeMap<String, ComponentState>,
    pub last_fall: Option<String>,
    pub frames_processed: u64,
    pub last_clip: Option<String>,
    pub uptime_seconds: u64,
}

/// Read-only view for the dashboard and other observers.
///
/// Reads only copy out of shared state and counters; nothing here waits on
/// the detection loop.
#[derive(Clone)]
pub struct StatusQuery {
    state: Arc<SharedState>,
    source: Arc<dyn FrameSource>,
    dispatcher: Arc<EventDispatcher>,
    device_id: String,
    resolution: (u32, u32),
    fps: u32,
}

impl StatusQuery {
    pub fn new(
        state: Arc<SharedState>,
        source: Arc<dyn FrameSource>,
        dispatcher: Arc<EventDispatcher>,
        device_id: impl Into<String>,
        resolution: (u32, u32),
        fps: u32,
    ) -> Self {
        Self {
            state,
            source,
            dispatcher,
            device_id: device_id.into(),
            resolution,
            fps,
        }
    }

    pub fn status(&self) -> SystemStatus {
        let detection = self.state.detection();

        SystemStatus {
            device_id: self.device_id.clone(),
            video_source: VideoSourceStatus {
                kind: self.source.kind(),
                stats: self.source.stats(),
            },
            camera: CameraStatusView {
                resolution: self.resolution,
                fps: self.fps,
                clip: detection.clip,
            },
            sinks: self.dispatcher.sink_statuses(),
            activity: self.state.activity(),
            components: self.state.component_states(),
            last_fall: detection
                .last_fall
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            frames_processed: detection.frames_processed,
            last_clip: detection
                .last_clip
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            uptime_seconds: self.state.uptime_seconds(),
            detection,
        }
    }

    /// Most recent events, newest first, at most `MAX_EVENTS_QUERY`
    pub fn events(&self, limit: usize) -> Vec<FallEventSummary> {
        self.state.events(limit.min(MAX_EVENTS_QUERY))
    }

    pub fn latest_frame(&self) -> Option<FrameData> {
        self.state.latest_frame()
    }

    pub fn is_receiving(&self) -> bool {
        self.source.is_receiving()
    }
}
