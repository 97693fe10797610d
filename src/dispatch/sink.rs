use super::event::{FallEvent, StatusMessage};
use crate::error::SinkError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// The delivery channels a fall can go out on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    LocalBus,
    CloudPubSub,
    BlobStorage,
    EventLog,
    Notification,
}

/// Whether the dispatcher waits for a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Run concurrently in the dispatch call; result is reported back
    Awaited,
    /// Queued to a per-sink worker; failures are only logged and counted
    FireAndForget,
}

impl SinkKind {
    pub const ALL: [SinkKind; 5] = [
        SinkKind::LocalBus,
        SinkKind::CloudPubSub,
        SinkKind::BlobStorage,
        SinkKind::EventLog,
        SinkKind::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::LocalBus => "local_bus",
            SinkKind::CloudPubSub => "cloud_pubsub",
            SinkKind::BlobStorage => "storage",
            SinkKind::EventLog => "event_log",
            SinkKind::Notification => "notification",
        }
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            SinkKind::LocalBus | SinkKind::CloudPubSub | SinkKind::BlobStorage => Delivery::Awaited,
            SinkKind::EventLog | SinkKind::Notification => Delivery::FireAndForget,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel that receives fall events
#[async_trait]
pub trait EventSink: Send + Sync {
    fn kind(&self) -> SinkKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    async fn deliver(&self, event: &FallEvent) -> Result<(), SinkError>;

    /// Sinks without a presence notion ignore status
    async fn publish_status(&self, _status: &StatusMessage) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&self) {}
}

/// "upload(local_path) -> url"
#[async_trait]
pub trait ClipStore: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, local_path: &Path) -> Result<String, SinkError>;
}
