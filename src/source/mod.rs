mod local;
mod remote;
mod slot;

#[cfg(test)]
mod tests;

pub use local::LocalSource;
pub use remote::{CameraStatus, RemoteFramePayload, RemoteIngest, RemoteSource};
pub use slot::{FrameSlot, LivenessTracker};

use crate::config::{FallwatchConfig, SourceKind};
use crate::error::SourceError;
use crate::frame::FrameData;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Counters reported through the status query
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SourceStats {
    pub connected: bool,
    pub receiving: bool,
    pub frames_received: u64,
    pub frames_overwritten: u64,
    pub seconds_since_last_frame: Option<f64>,
    /// Last reported status per remote camera device
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub remote_cameras: BTreeMap<String, CameraStatus>,
}

/// Local camera or network stream behind one interface.
///
/// `get_frame` never waits: it hands out the newest unconsumed frame or
/// nothing, and the caller decides what to show meanwhile.
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn connect(&self) -> Result<(), SourceError>;

    fn get_frame(&self) -> Option<FrameData>;

    fn is_receiving(&self) -> bool;

    async fn disconnect(&self);

    fn stats(&self) -> SourceStats;
}

/// Build the configured source without connecting it
pub fn build_source(config: &FallwatchConfig, connect_timeout: Duration) -> Arc<dyn FrameSource> {
    match config.source.kind {
        SourceKind::Local => Arc::new(LocalSource::new(
            config.camera.clone(),
            config.liveness_window(),
        )),
        SourceKind::Remote => Arc::new(RemoteSource::new(
            config.remote.clone(),
            config.camera.resolution,
            config.liveness_window(),
            connect_timeout,
        )),
    }
}
