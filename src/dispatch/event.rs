use super::sink::SinkKind;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Facts about one accepted fall, fixed at detection time
#[derive(Debug, Clone, PartialEq)]
pub struct FallRecord {
    pub id: Uuid,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub device_id: String,
    /// Where the clip is being written, if a recording was started
    pub clip_path: Option<PathBuf>,
}

/// How one sink handled an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Stored { url: String },
    Failed { error: String },
    Skipped { reason: String },
}

impl DeliveryOutcome {
    pub fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::Stored { .. })
    }
}

/// A detected fall shared read-only across sink tasks.
///
/// Cloning is cheap; every clone sees the same outcome slots, and those slots
/// are the only thing that changes after creation.
#[derive(Debug, Clone)]
pub struct FallEvent {
    record: Arc<FallRecord>,
    outcomes: Arc<Mutex<BTreeMap<SinkKind, DeliveryOutcome>>>,
}

impl FallEvent {
    pub fn new(record: FallRecord) -> Self {
        Self {
            record: Arc::new(record),
            outcomes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn detected(
        confidence: f64,
        device_id: impl Into<String>,
        clip_path: Option<PathBuf>,
    ) -> Self {
        Self::new(FallRecord {
            id: Uuid::new_v4(),
            confidence,
            detected_at: Utc::now(),
            device_id: device_id.into(),
            clip_path,
        })
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn record(&self) -> &FallRecord {
        &self.record
    }

    pub fn record_outcome(&self, sink: SinkKind, outcome: DeliveryOutcome) {
        self.outcomes.lock().insert(sink, outcome);
    }

    pub fn outcome(&self, sink: SinkKind) -> Option<DeliveryOutcome> {
        self.outcomes.lock().get(&sink).cloned()
    }

    pub fn outcomes(&self) -> BTreeMap<SinkKind, DeliveryOutcome> {
        self.outcomes.lock().clone()
    }

    /// URL of the uploaded clip, once storage succeeded
    pub fn clip_url(&self) -> Option<String> {
        match self.outcome(SinkKind::BlobStorage) {
            Some(DeliveryOutcome::Stored { url }) => Some(url),
            _ => None,
        }
    }

    /// Wire form for the messaging sinks
    pub fn message(&self) -> FallEventMessage {
        let record = &self.record;
        FallEventMessage {
            event: FALL_DETECTED.to_string(),
            device_id: record.device_id.clone(),
            confidence: (record.confidence * 1000.0).round() / 1000.0,
            timestamp: record.detected_at.timestamp(),
            timestamp_iso: record
                .detected_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            clip_path: record
                .clip_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            s3_url: self.clip_url(),
        }
    }

    /// Serializable view for the history query
    pub fn summary(&self) -> FallEventSummary {
        FallEventSummary {
            event_id: self.record.id,
            message: self.message(),
            outcomes: self
                .outcomes()
                .into_iter()
                .map(|(kind, outcome)| (kind.as_str().to_string(), outcome))
                .collect(),
        }
    }
}

pub const FALL_DETECTED: &str = "fall_detected";

/// `{event, device_id, confidence, timestamp, timestamp_iso, clip_path, s3_url}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallEventMessage {
    pub event: String,
    pub device_id: String,
    pub confidence: f64,
    /// Unix seconds
    pub timestamp: i64,
    pub timestamp_iso: String,
    pub clip_path: Option<String>,
    pub s3_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallEventSummary {
    pub event_id: Uuid,
    #[serde(flatten)]
    pub message: FallEventMessage,
    pub outcomes: BTreeMap<String, DeliveryOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Offline,
}

/// `{status, device_id, timestamp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: OnlineStatus,
    pub device_id: String,
    pub timestamp: i64,
}

impl StatusMessage {
    pub fn new(status: OnlineStatus, device_id: impl Into<String>) -> Self {
        Self {
            status,
            device_id: device_id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}
