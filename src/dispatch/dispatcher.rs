use super::event::{DeliveryOutcome, FallEvent, OnlineStatus, StatusMessage};
use super::metrics::{MetricsSnapshot, SinkMetrics};
use super::registry::{SinkRegistry, SinkState};
use super::sink::{ClipStore, Delivery, EventSink, SinkKind};
use super::worker::SinkWorker;
use crate::clip::{ClipReport, PendingClip};
use crate::config::{FallwatchConfig, UploadMode};
use crate::error::{ClipError, SinkError};
use crate::events::{EventBus, FallwatchEvent};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub device_id: String,
    pub publish_timeout: Duration,
    pub upload_timeout: Duration,
    /// How long an inline dispatch holds fan-out for its clip; a slower clip
    /// is still uploaded once written, just without the URL in the message
    pub clip_wait: Duration,
    pub upload_mode: UploadMode,
    pub queue_capacity: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &FallwatchConfig) -> Self {
        let upload_timeout = Duration::from_secs(config.dispatch.upload_timeout_seconds);
        Self {
            device_id: config.system.device_id.clone(),
            publish_timeout: config.publish_timeout(),
            upload_timeout,
            clip_wait: Duration::from_secs(config.clip.post_roll_seconds as u64) + upload_timeout,
            upload_mode: config.dispatch.upload_mode,
            queue_capacity: config.dispatch.worker_queue_capacity,
        }
    }
}

/// State and counters of one sink for the status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkStatus {
    #[serde(flatten)]
    pub state: SinkState,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

/// What one dispatch call observed
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub event_id: Uuid,
    /// Outcomes known when the awaited sinks finished
    pub outcomes: BTreeMap<SinkKind, DeliveryOutcome>,
    /// Fire-and-forget sinks the event was queued to
    pub queued: Vec<SinkKind>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, DeliveryOutcome::Failed { .. }))
            .count()
    }
}

struct SinkEntry {
    kind: SinkKind,
    sink: Arc<dyn EventSink>,
    metrics: Arc<SinkMetrics>,
    worker: Mutex<Option<SinkWorker>>,
}

struct StoreEntry {
    store: Arc<dyn ClipStore>,
    metrics: Arc<SinkMetrics>,
}

/// Fans a fall out to every enabled sink.
///
/// Each sink is its own failure domain: a slow or failing sink only affects
/// its own outcome slot and counters.
pub struct EventDispatcher {
    entries: Vec<SinkEntry>,
    store: Option<StoreEntry>,
    states: BTreeMap<SinkKind, SinkState>,
    settings: DispatchSettings,
    tracker: TaskTracker,
    event_bus: EventBus,
}

impl EventDispatcher {
    /// Spawns the fire-and-forget workers; call inside a tokio runtime.
    pub fn new(registry: SinkRegistry, settings: DispatchSettings, event_bus: EventBus) -> Self {
        let (states, sinks, clip_store) = registry.into_parts();

        let entries = sinks
            .into_iter()
            .map(|sink| {
                let metrics = Arc::new(SinkMetrics::new());
                let worker = match sink.kind().delivery() {
                    Delivery::FireAndForget => Some(SinkWorker::spawn(
                        Arc::clone(&sink),
                        Arc::clone(&metrics),
                        settings.queue_capacity,
                        event_bus.clone(),
                    )),
                    Delivery::Awaited => None,
                };
                SinkEntry {
                    kind: sink.kind(),
                    sink,
                    metrics,
                    worker: Mutex::new(worker),
                }
            })
            .collect::<Vec<_>>();

        info!(
            sinks = entries.len(),
            storage = clip_store.is_some(),
            "Event dispatcher ready"
        );

        Self {
            entries,
            store: clip_store.map(|store| StoreEntry {
                store,
                metrics: Arc::new(SinkMetrics::new()),
            }),
            states,
            settings,
            tracker: TaskTracker::new(),
            event_bus,
        }
    }

    /// Deliver one event.
    ///
    /// Inline uploads finish before the awaited sinks run so they carry the
    /// clip URL; background uploads fill the storage slot later.
    #[instrument(name = "dispatch", skip_all, fields(event_id = %event.id()))]
    pub async fn dispatch(&self, event: FallEvent, clip: Option<PendingClip>) -> DispatchReport {
        match (&self.store, clip) {
            (Some(store), Some(clip)) => {
                let upload = ClipUpload {
                    store: Arc::clone(&store.store),
                    metrics: Arc::clone(&store.metrics),
                    upload_timeout: self.settings.upload_timeout,
                    event_bus: self.event_bus.clone(),
                };
                match self.settings.upload_mode {
                    UploadMode::Inline => match clip.try_wait(self.settings.clip_wait).await {
                        Ok(written) => upload.run(event.clone(), written).await,
                        Err(pending) => {
                            info!(
                                clip = %pending.path().display(),
                                "Clip still recording, uploading once it is written"
                            );
                            self.spawn_upload(upload, event.clone(), pending);
                        }
                    },
                    UploadMode::Background => self.spawn_upload(upload, event.clone(), clip),
                }
            }
            (Some(_), None) => {
                event.record_outcome(
                    SinkKind::BlobStorage,
                    DeliveryOutcome::skipped("no clip recorded"),
                );
            }
            (None, _) => {}
        }

        let mut queued = Vec::new();
        for entry in &self.entries {
            let worker = entry.worker.lock();
            if let Some(worker) = worker.as_ref() {
                if worker.try_send(event.clone()) {
                    queued.push(entry.kind);
                } else {
                    event.record_outcome(entry.kind, DeliveryOutcome::failed("queue full"));
                }
            }
        }

        let awaited = self
            .entries
            .iter()
            .filter(|entry| entry.kind.delivery() == Delivery::Awaited)
            .map(|entry| self.deliver_awaited(entry, &event));
        join_all(awaited).await;

        let report = DispatchReport {
            event_id: event.id(),
            outcomes: event.outcomes(),
            queued,
        };
        info!(
            delivered = report.delivered(),
            failed = report.failed(),
            queued = report.queued.len(),
            "Fall event dispatched"
        );
        report
    }

    async fn deliver_awaited(&self, entry: &SinkEntry, event: &FallEvent) {
        let timeout = self.settings.publish_timeout;
        let result = match tokio::time::timeout(timeout, entry.sink.deliver(event)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                sink: entry.kind.as_str().to_string(),
                millis: timeout.as_millis() as u64,
            }),
        };

        let success = match result {
            Ok(()) => {
                entry.metrics.inc_write_count();
                event.record_outcome(entry.kind, DeliveryOutcome::Delivered);
                debug!(sink = %entry.kind, "Delivered");
                true
            }
            Err(e) => {
                entry.metrics.record_failure(&e);
                warn!(sink = %entry.kind, error = %e, "Delivery failed");
                event.record_outcome(entry.kind, DeliveryOutcome::failed(&e));
                false
            }
        };

        let _ = self.event_bus.publish(FallwatchEvent::DeliveryCompleted {
            event_id: event.id(),
            sink: entry.kind.as_str(),
            success,
        });
    }

    fn spawn_upload(&self, upload: ClipUpload, event: FallEvent, clip: PendingClip) {
        self.tracker.spawn(async move {
            let written = clip.finished().await;
            upload.run(event, written).await;
        });
    }

    /// Dispatch on a tracked task so the caller never waits on the network
    pub fn spawn_dispatch(self: &Arc<Self>, event: FallEvent, clip: Option<PendingClip>) {
        let dispatcher = Arc::clone(self);
        self.tracker.spawn(async move {
            dispatcher.dispatch(event, clip).await;
        });
    }

    /// Send presence to every sink that has it; returns how many succeeded
    pub async fn publish_status(&self, status: OnlineStatus) -> usize {
        let message = StatusMessage::new(status, &self.settings.device_id);
        let timeout = self.settings.publish_timeout;

        let results = join_all(self.entries.iter().map(|entry| {
            let message = &message;
            async move {
                match tokio::time::timeout(timeout, entry.sink.publish_status(message)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(sink = %entry.kind, error = %e, "Status publish failed");
                        false
                    }
                    Err(_) => {
                        warn!(sink = %entry.kind, "Status publish timed out");
                        false
                    }
                }
            }
        }))
        .await;

        let published = results.into_iter().filter(|ok| *ok).count();
        info!(?status, published, "Status published");
        published
    }

    pub fn sink_state(&self, kind: SinkKind) -> SinkState {
        self.states.get(&kind).cloned().unwrap_or(SinkState::Disabled)
    }

    pub fn sink_statuses(&self) -> BTreeMap<String, SinkStatus> {
        self.states
            .iter()
            .map(|(kind, state)| {
                let metrics = if *kind == SinkKind::BlobStorage {
                    self.store.as_ref().map(|s| s.metrics.snapshot())
                } else {
                    self.entries
                        .iter()
                        .find(|e| e.kind == *kind)
                        .map(|e| e.metrics.snapshot())
                };
                (
                    kind.as_str().to_string(),
                    SinkStatus {
                        state: state.clone(),
                        metrics: metrics.unwrap_or_default(),
                    },
                )
            })
            .collect()
    }

    /// Dispatches and uploads still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for in-flight work, drain the workers and close every sink
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.tracker.close();
        if tokio::time::timeout(drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.tracker.len(),
                "Dispatches still running after drain timeout"
            );
        }

        for entry in &self.entries {
            let worker = entry.worker.lock().take();
            if let Some(worker) = worker {
                worker.shutdown(drain_timeout).await;
            }
        }

        join_all(self.entries.iter().map(|entry| entry.sink.close())).await;
        info!("Event dispatcher shut down");
    }
}

/// Uploads one finished clip and records the storage outcome
struct ClipUpload {
    store: Arc<dyn ClipStore>,
    metrics: Arc<SinkMetrics>,
    upload_timeout: Duration,
    event_bus: EventBus,
}

impl ClipUpload {
    #[instrument(name = "store_clip", skip_all, fields(event_id = %event.id()))]
    async fn run(self, event: FallEvent, written: Result<ClipReport, ClipError>) {
        let result = match written {
            Ok(report) => {
                match tokio::time::timeout(self.upload_timeout, self.store.upload(&report.path))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout {
                        sink: SinkKind::BlobStorage.as_str().to_string(),
                        millis: self.upload_timeout.as_millis() as u64,
                    }),
                }
            }
            Err(e) => Err(SinkError::delivery(
                SinkKind::BlobStorage.as_str(),
                format!("clip unavailable: {}", e),
            )),
        };

        let success = match result {
            Ok(url) => {
                self.metrics.inc_write_count();
                event.record_outcome(SinkKind::BlobStorage, DeliveryOutcome::Stored { url });
                true
            }
            Err(e) => {
                self.metrics.record_failure(&e);
                warn!(store = self.store.name(), error = %e, "Clip upload failed");
                event.record_outcome(SinkKind::BlobStorage, DeliveryOutcome::failed(&e));
                false
            }
        };

        let _ = self.event_bus.publish(FallwatchEvent::DeliveryCompleted {
            event_id: event.id(),
            sink: SinkKind::BlobStorage.as_str(),
            success,
        });
    }
}
