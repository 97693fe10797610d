use super::state::SharedState;
use crate::error::EventBusError;
use crate::events::{EventBus, EventFilter, EventReceiver, FallwatchEvent};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

const COLLECTED_EVENTS: [&str; 5] = [
    "clip_finalized",
    "clip_failed",
    "delivery_completed",
    "source_status_changed",
    "system_error",
];

/// Latest result from one sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastDelivery {
    pub event_id: Uuid,
    pub success: bool,
    pub at: String,
}

/// Pipeline outcomes gathered from the event bus for the status query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityStatus {
    pub clips_finalized: u64,
    pub partial_clips: u64,
    pub clips_failed: u64,
    pub last_clip_error: Option<String>,
    pub deliveries: BTreeMap<String, LastDelivery>,
    pub source_changes: u64,
    pub last_system_error: Option<String>,
}

impl ActivityStatus {
    pub fn apply(&mut self, event: &FallwatchEvent) {
        match event {
            FallwatchEvent::ClipFinalized { complete, .. } => {
                self.clips_finalized += 1;
                if !complete {
                    self.partial_clips += 1;
                }
            }
            FallwatchEvent::ClipFailed { path, error } => {
                self.clips_failed += 1;
                self.last_clip_error = Some(format!("{}: {}", path.display(), error));
            }
            FallwatchEvent::DeliveryCompleted {
                event_id,
                sink,
                success,
            } => {
                self.deliveries.insert(
                    sink.to_string(),
                    LastDelivery {
                        event_id: *event_id,
                        success: *success,
                        at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    },
                );
            }
            FallwatchEvent::SourceStatusChanged { .. } => self.source_changes += 1,
            FallwatchEvent::SystemError { component, error } => {
                self.last_system_error = Some(format!("{}: {}", component, error));
            }
            _ => {}
        }
    }
}

/// Subscribe now and fold bus events into `state` until `cancel` fires.
///
/// The subscription is taken before the task starts, so nothing published
/// after this call is missed. Events already queued are drained before the
/// cancellation is observed.
pub fn spawn_activity_collector(
    bus: &EventBus,
    state: Arc<SharedState>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = EventReceiver::new(
        bus,
        EventFilter::EventTypes(COLLECTED_EVENTS.to_vec()),
        "activity",
    );

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                received = receiver.recv() => match received {
                    Ok(event) => state.update_activity(|activity| activity.apply(&event)),
                    Err(EventBusError::Lagged { .. }) => continue,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        debug!("Activity collector stopped");
    })
}
