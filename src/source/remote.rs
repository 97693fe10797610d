use super::{FrameSlot, FrameSource, SourceStats};
use crate::config::{RemoteConfig, SourceKind};
use crate::error::SourceError;
use crate::frame::FrameData;
use crate::mqtt::{MessageHandler, MqttLink};
use crate::pose::{Landmark, LandmarkSnapshot};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const PROGRESS_LOG_EVERY: u64 = 100;

/// One frame as published by an edge camera
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteFramePayload {
    #[serde(default = "unknown_device")]
    pub device_id: String,
    /// Base64 JPEG
    pub frame: String,
    #[serde(default)]
    pub frame_id: u64,
    /// ISO-8601 string or unix seconds
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Landmarks computed on the edge device
    #[serde(default)]
    pub landmarks: Option<Vec<Landmark>>,
}

#[derive(Debug, Deserialize)]
struct RemoteStatusPayload {
    #[serde(default = "unknown_device")]
    device_id: String,
    status: String,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

fn unknown_device() -> String {
    "unknown".to_string()
}

/// Last status an edge camera reported about itself
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CameraStatus {
    pub status: String,
    pub reported_at: Option<String>,
    pub received_at: DateTime<Utc>,
}

fn parse_timestamp(value: &serde_json::Value) -> Option<SystemTime> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| SystemTime::from(t.with_timezone(&Utc))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .and_then(|offset| SystemTime::UNIX_EPOCH.checked_add(offset)),
        _ => None,
    }
}

fn timestamp_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turns MQTT publishes into frames and camera status updates.
///
/// Runs inside the MQTT driver callback, so it only decodes and swaps state.
#[derive(Debug)]
pub struct RemoteIngest {
    frame_topic: String,
    status_topic: String,
    default_resolution: (u32, u32),
    slot: FrameSlot,
    cameras: Mutex<BTreeMap<String, CameraStatus>>,
    malformed: AtomicU64,
}

impl RemoteIngest {
    pub fn new(
        frame_topic: impl Into<String>,
        status_topic: impl Into<String>,
        default_resolution: (u32, u32),
        liveness_window: Duration,
    ) -> Self {
        Self {
            frame_topic: frame_topic.into(),
            status_topic: status_topic.into(),
            default_resolution,
            slot: FrameSlot::new(liveness_window),
            cameras: Mutex::new(BTreeMap::new()),
            malformed: AtomicU64::new(0),
        }
    }

    pub fn handle(&self, topic: &str, payload: &[u8]) {
        let result = if topic == self.frame_topic {
            self.ingest_frame(payload)
        } else if topic == self.status_topic {
            self.ingest_status(payload)
        } else {
            debug!("Ignoring message on unexpected topic {}", topic);
            return;
        };

        if let Err(e) = result {
            self.malformed.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping message on {}: {}", topic, e);
        }
    }

    /// Decode a frame payload into the slot, replacing any unconsumed frame
    pub fn ingest_frame(&self, payload: &[u8]) -> Result<(), SourceError> {
        let message: RemoteFramePayload =
            serde_json::from_slice(payload).map_err(|e| SourceError::Payload {
                details: e.to_string(),
            })?;

        let data = BASE64
            .decode(message.frame.as_bytes())
            .map_err(|e| SourceError::Payload {
                details: format!("frame is not base64: {}", e),
            })?;
        if data.is_empty() {
            return Err(SourceError::Payload {
                details: "empty frame".to_string(),
            });
        }

        let width = message.width.unwrap_or(self.default_resolution.0);
        let height = message.height.unwrap_or(self.default_resolution.1);
        let timestamp = message
            .timestamp
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or_else(SystemTime::now);

        let mut frame = FrameData::new(message.frame_id, timestamp, data, width, height);
        if let Some(points) = message.landmarks {
            frame = frame.with_landmarks(LandmarkSnapshot::new(points, width, height));
        }

        self.slot.store(frame);

        let received = self.slot.received();
        if received % PROGRESS_LOG_EVERY == 0 {
            info!(
                "Received {} remote frames (latest from {})",
                received, message.device_id
            );
        }
        Ok(())
    }

    pub fn ingest_status(&self, payload: &[u8]) -> Result<(), SourceError> {
        let message: RemoteStatusPayload =
            serde_json::from_slice(payload).map_err(|e| SourceError::Payload {
                details: e.to_string(),
            })?;

        info!("Camera {}: {}", message.device_id, message.status);
        self.cameras.lock().insert(
            message.device_id,
            CameraStatus {
                status: message.status,
                reported_at: message.timestamp.as_ref().map(timestamp_text),
                received_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn cameras(&self) -> BTreeMap<String, CameraStatus> {
        self.cameras.lock().clone()
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Frames pushed by an edge camera over MQTT
pub struct RemoteSource {
    config: RemoteConfig,
    ingest: Arc<RemoteIngest>,
    connect_timeout: Duration,
    link: Mutex<Option<Arc<MqttLink>>>,
}

impl RemoteSource {
    pub fn new(
        config: RemoteConfig,
        default_resolution: (u32, u32),
        liveness_window: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let ingest = Arc::new(RemoteIngest::new(
            config.frame_topic.clone(),
            config.status_topic.clone(),
            default_resolution,
            liveness_window,
        ));
        Self {
            config,
            ingest,
            connect_timeout,
            link: Mutex::new(None),
        }
    }

    pub fn ingest(&self) -> &Arc<RemoteIngest> {
        &self.ingest
    }
}

#[async_trait]
impl FrameSource for RemoteSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    async fn connect(&self) -> Result<(), SourceError> {
        if self.link.lock().is_some() {
            debug!("Remote source already connected");
            return Ok(());
        }

        let ingest = Arc::clone(&self.ingest);
        let handler: MessageHandler =
            Arc::new(move |topic: &str, payload: &[u8]| ingest.handle(topic, payload));

        let link = MqttLink::connect(
            "remote-source",
            &self.config.broker,
            vec![
                self.config.frame_topic.clone(),
                self.config.status_topic.clone(),
            ],
            Some(handler),
            None,
            self.connect_timeout,
        )
        .await?;

        info!(
            "Receiving remote frames on {} via {}",
            self.config.frame_topic,
            link.endpoint()
        );
        *self.link.lock() = Some(Arc::new(link));
        Ok(())
    }

    fn get_frame(&self) -> Option<FrameData> {
        self.ingest.slot().take()
    }

    fn is_receiving(&self) -> bool {
        self.ingest.slot().is_receiving()
    }

    async fn disconnect(&self) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            link.disconnect().await;
        }
        self.ingest.slot().clear();
    }

    fn stats(&self) -> SourceStats {
        let slot = self.ingest.slot();
        SourceStats {
            connected: self
                .link
                .lock()
                .as_ref()
                .map(|l| l.is_connected())
                .unwrap_or(false),
            receiving: slot.is_receiving(),
            frames_received: slot.received(),
            frames_overwritten: slot.overwritten(),
            seconds_since_last_frame: slot.liveness().silence().map(|d| d.as_secs_f64()),
            remote_cameras: self.ingest.cameras(),
        }
    }
}
