use super::sinks::{DirectoryClipStore, FallAlert, JsonlEventLog};
use super::*;
use crate::clip::{ClipAssembler, ClipBuffer, ClipNaming, MjpegClipWriter, PendingClip};
use crate::config::UploadMode;
use crate::error::SinkError;
use crate::events::{EventBus, EventFilter, EventReceiver, FallwatchEvent};
use crate::frame::FrameData;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

fn settings() -> DispatchSettings {
    DispatchSettings {
        device_id: "test-device".to_string(),
        publish_timeout: Duration::from_millis(200),
        upload_timeout: Duration::from_secs(1),
        clip_wait: Duration::from_secs(2),
        upload_mode: UploadMode::Inline,
        queue_capacity: 8,
    }
}

fn fixed_event(clip_path: Option<PathBuf>) -> FallEvent {
    FallEvent::new(FallRecord {
        id: Uuid::new_v4(),
        confidence: 0.87654,
        detected_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        device_id: "dev-1".to_string(),
        clip_path,
    })
}

/// Keeps every message and status it is handed
struct RecordingSink {
    kind: SinkKind,
    messages: Mutex<Vec<FallEventMessage>>,
    statuses: Mutex<Vec<StatusMessage>>,
}

impl RecordingSink {
    fn new(kind: SinkKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            messages: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn deliver(&self, event: &FallEvent) -> Result<(), SinkError> {
        self.messages.lock().push(event.message());
        Ok(())
    }

    async fn publish_status(&self, status: &StatusMessage) -> Result<(), SinkError> {
        self.statuses.lock().push(status.clone());
        Ok(())
    }
}

struct FailingSink(SinkKind);

#[async_trait]
impl EventSink for FailingSink {
    fn kind(&self) -> SinkKind {
        self.0
    }

    async fn deliver(&self, _event: &FallEvent) -> Result<(), SinkError> {
        Err(SinkError::delivery(self.0.as_str(), "broker unreachable"))
    }
}

struct SlowSink(SinkKind);

#[async_trait]
impl EventSink for SlowSink {
    fn kind(&self) -> SinkKind {
        self.0
    }

    async fn deliver(&self, _event: &FallEvent) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

/// Blocks each delivery until released
struct GateSink {
    started: Notify,
    release: Notify,
    delivered: Mutex<usize>,
}

#[async_trait]
impl EventSink for GateSink {
    fn kind(&self) -> SinkKind {
        SinkKind::EventLog
    }

    async fn deliver(&self, _event: &FallEvent) -> Result<(), SinkError> {
        self.started.notify_one();
        self.release.notified().await;
        *self.delivered.lock() += 1;
        Ok(())
    }
}

fn jpeg_frame(id: u64) -> FrameData {
    FrameData::new(
        id,
        SystemTime::now(),
        vec![0xFF, 0xD8, id as u8, 0xFF, 0xD9],
        4,
        4,
    )
}

/// Records a tiny clip and returns the handle to its pending write
fn record_clip(dir: &TempDir, bus: &EventBus) -> (ClipAssembler, PendingClip) {
    let assembler = ClipAssembler::with_writer(
        ClipBuffer::new(2, 2),
        ClipNaming::new(dir.path().join("clips"), chrono_tz::UTC, "mjpeg"),
        10,
        Arc::new(MjpegClipWriter),
        bus.clone(),
    );
    assembler.add_frame(jpeg_frame(1));
    assembler.add_frame(jpeg_frame(2));
    let pending = assembler.trigger().expect("recording should start");
    assembler.add_frame(jpeg_frame(3));
    assembler.add_frame(jpeg_frame(4));
    (assembler, pending)
}

#[test]
fn test_message_wire_shape() {
    let event = fixed_event(Some(PathBuf::from("/clips/fall_1.mp4")));
    let json = serde_json::to_value(event.message()).unwrap();

    assert_eq!(json["event"], "fall_detected");
    assert_eq!(json["device_id"], "dev-1");
    assert_eq!(json["confidence"], 0.877);
    assert_eq!(json["timestamp"], 1704164645);
    assert_eq!(json["timestamp_iso"], "2024-01-02T03:04:05Z");
    assert_eq!(json["clip_path"], "/clips/fall_1.mp4");
    assert!(json["s3_url"].is_null());
    assert_eq!(json.as_object().unwrap().len(), 7);
}

#[test]
fn test_message_carries_stored_url() {
    let event = fixed_event(None);
    event.record_outcome(
        SinkKind::BlobStorage,
        DeliveryOutcome::Stored {
            url: "https://bucket/fall_1.mp4".to_string(),
        },
    );

    let message = event.message();
    assert_eq!(message.s3_url.as_deref(), Some("https://bucket/fall_1.mp4"));
    assert!(message.clip_path.is_none());
}

#[test]
fn test_status_message_shape() {
    let json = serde_json::to_value(StatusMessage::new(OnlineStatus::Offline, "dev-1")).unwrap();
    assert_eq!(json["status"], "offline");
    assert_eq!(json["device_id"], "dev-1");
    assert!(json["timestamp"].as_i64().unwrap() > 0);
}

#[test]
fn test_alert_text() {
    let event = fixed_event(None);
    let alert = FallAlert::for_event(&event);

    assert_eq!(alert.subject, "Fall Detected - dev-1");
    assert!(alert.message.contains("Time: 2024-01-02 03:04:05 UTC"));
    assert!(alert.message.contains("Device: dev-1"));
    assert!(alert.message.contains("Confidence: 87.7%"));
    assert!(!alert.message.contains("Video Clip"));
    assert!(alert.message.ends_with("Please check on the person immediately."));

    event.record_outcome(
        SinkKind::BlobStorage,
        DeliveryOutcome::Stored {
            url: "file:///clips/a.mjpeg".to_string(),
        },
    );
    let alert = FallAlert::for_event(&event);
    assert!(alert.message.contains("Video Clip: file:///clips/a.mjpeg"));
    assert_eq!(alert.clip_url.as_deref(), Some("file:///clips/a.mjpeg"));
}

#[test]
fn test_alert_falls_back_to_local_clip_path() {
    let event = fixed_event(Some(PathBuf::from("/clips/fall_1.mjpeg")));
    let alert = FallAlert::for_event(&event);
    assert!(alert.message.contains("Video Clip: /clips/fall_1.mjpeg"));
    assert_eq!(alert.clip_url.as_deref(), Some("/clips/fall_1.mjpeg"));

    event.record_outcome(
        SinkKind::BlobStorage,
        DeliveryOutcome::Stored {
            url: "https://bucket/fall_1.mjpeg".to_string(),
        },
    );
    let alert = FallAlert::for_event(&event);
    assert_eq!(alert.clip_url.as_deref(), Some("https://bucket/fall_1.mjpeg"));
}

#[test]
fn test_registry_defaults_to_disabled() {
    let mut registry = SinkRegistry::new();
    assert_eq!(registry.states().len(), SinkKind::ALL.len());
    assert!(SinkKind::ALL
        .iter()
        .all(|kind| registry.state(*kind) == SinkState::Disabled));

    registry.register(RecordingSink::new(SinkKind::LocalBus));
    registry.mark_unavailable(SinkKind::CloudPubSub, "connect timed out");

    assert!(registry.is_enabled(SinkKind::LocalBus));
    assert_eq!(
        registry.state(SinkKind::CloudPubSub),
        SinkState::Unavailable("connect timed out".to_string())
    );
}

#[tokio::test]
async fn test_failing_sink_does_not_block_others() {
    let bus = EventBus::new(32);
    let recorder = RecordingSink::new(SinkKind::LocalBus);
    let mut registry = SinkRegistry::new();
    registry.register(recorder.clone());
    registry.register(Arc::new(FailingSink(SinkKind::CloudPubSub)));
    let dispatcher = EventDispatcher::new(registry, settings(), bus);

    let report = dispatcher.dispatch(fixed_event(None), None).await;

    assert_eq!(report.outcomes[&SinkKind::LocalBus], DeliveryOutcome::Delivered);
    assert!(matches!(
        report.outcomes[&SinkKind::CloudPubSub],
        DeliveryOutcome::Failed { .. }
    ));
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(recorder.messages.lock().len(), 1);

    let statuses = dispatcher.sink_statuses();
    assert_eq!(statuses["cloud_pubsub"].metrics.failure_count, 1);
    assert!(statuses["cloud_pubsub"]
        .metrics
        .last_error
        .as_deref()
        .unwrap()
        .contains("broker unreachable"));
    assert_eq!(statuses["local_bus"].metrics.write_count, 1);
}

#[tokio::test]
async fn test_slow_sink_times_out_alone() {
    let recorder = RecordingSink::new(SinkKind::CloudPubSub);
    let mut registry = SinkRegistry::new();
    registry.register(Arc::new(SlowSink(SinkKind::LocalBus)));
    registry.register(recorder.clone());
    let dispatcher = EventDispatcher::new(registry, settings(), EventBus::new(32));

    let started = std::time::Instant::now();
    let report = dispatcher.dispatch(fixed_event(None), None).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    match &report.outcomes[&SinkKind::LocalBus] {
        DeliveryOutcome::Failed { error } => assert!(error.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(
        report.outcomes[&SinkKind::CloudPubSub],
        DeliveryOutcome::Delivered
    );
}

#[tokio::test]
async fn test_single_enabled_sink() {
    let recorder = RecordingSink::new(SinkKind::CloudPubSub);
    let mut registry = SinkRegistry::new();
    registry.register(recorder.clone());
    let dispatcher = EventDispatcher::new(registry, settings(), EventBus::new(32));

    let report = dispatcher.dispatch(fixed_event(None), None).await;

    assert_eq!(report.outcomes.len(), 1);
    assert!(report.queued.is_empty());
    assert_eq!(dispatcher.sink_state(SinkKind::LocalBus), SinkState::Disabled);

    let json = serde_json::to_value(dispatcher.sink_statuses()).unwrap();
    assert_eq!(json["cloud_pubsub"]["state"], "enabled");
    assert_eq!(json["cloud_pubsub"]["write_count"], 1);
    assert_eq!(json["storage"]["state"], "disabled");
}

#[tokio::test]
async fn test_unavailable_state_is_reported() {
    let mut registry = SinkRegistry::new();
    registry.mark_unavailable(SinkKind::Notification, "no webhook_url");
    let dispatcher = EventDispatcher::new(registry, settings(), EventBus::new(32));

    let json = serde_json::to_value(dispatcher.sink_statuses()).unwrap();
    assert_eq!(json["notification"]["state"], "unavailable");
    assert_eq!(json["notification"]["reason"], "no webhook_url");
}

#[tokio::test]
async fn test_full_queue_drops_event() {
    let gate = Arc::new(GateSink {
        started: Notify::new(),
        release: Notify::new(),
        delivered: Mutex::new(0),
    });
    let mut registry = SinkRegistry::new();
    registry.register(gate.clone());
    let dispatcher = EventDispatcher::new(
        registry,
        DispatchSettings {
            queue_capacity: 1,
            ..settings()
        },
        EventBus::new(32),
    );

    let first = dispatcher.dispatch(fixed_event(None), None).await;
    assert_eq!(first.queued, vec![SinkKind::EventLog]);
    gate.started.notified().await;

    let second = dispatcher.dispatch(fixed_event(None), None).await;
    assert_eq!(second.queued, vec![SinkKind::EventLog]);

    let third = dispatcher.dispatch(fixed_event(None), None).await;
    assert!(third.queued.is_empty());
    assert_eq!(
        third.outcomes[&SinkKind::EventLog],
        DeliveryOutcome::failed("queue full")
    );
    assert_eq!(dispatcher.sink_statuses()["event_log"].metrics.dropped_count, 1);

    gate.release.notify_one();
    gate.started.notified().await;
    gate.release.notify_one();
    dispatcher.shutdown(Duration::from_secs(2)).await;
    assert_eq!(*gate.delivered.lock(), 2);
}

#[tokio::test]
async fn test_inline_upload_attaches_url() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(64);
    let (_assembler, pending) = record_clip(&dir, &bus);

    let recorder = RecordingSink::new(SinkKind::LocalBus);
    let mut registry = SinkRegistry::new();
    registry.register(recorder.clone());
    registry.register_clip_store(Arc::new(
        DirectoryClipStore::new(dir.path().join("store"), "falls/").unwrap(),
    ));
    let dispatcher = EventDispatcher::new(registry, settings(), bus);

    let event = fixed_event(Some(pending.path().to_path_buf()));
    let report = dispatcher.dispatch(event, Some(pending)).await;

    let url = match &report.outcomes[&SinkKind::BlobStorage] {
        DeliveryOutcome::Stored { url } => url.clone(),
        other => panic!("expected stored clip, got {:?}", other),
    };
    assert!(url.starts_with("file://"));
    assert!(url.contains("falls/"));

    let messages = recorder.messages.lock();
    assert_eq!(messages[0].s3_url.as_deref(), Some(url.as_str()));
    assert!(messages[0].clip_path.is_some());
}

#[tokio::test]
async fn test_missing_clip_skips_storage() {
    let dir = TempDir::new().unwrap();
    let mut registry = SinkRegistry::new();
    registry.register_clip_store(Arc::new(
        DirectoryClipStore::new(dir.path(), "").unwrap(),
    ));
    let dispatcher = EventDispatcher::new(registry, settings(), EventBus::new(32));

    let report = dispatcher.dispatch(fixed_event(None), None).await;
    assert!(matches!(
        report.outcomes[&SinkKind::BlobStorage],
        DeliveryOutcome::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_lost_clip_still_delivers_message() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(64);
    let assembler = ClipAssembler::with_writer(
        ClipBuffer::new(2, 50),
        ClipNaming::new(dir.path().join("clips"), chrono_tz::UTC, "mjpeg"),
        10,
        Arc::new(MjpegClipWriter),
        bus.clone(),
    );
    assembler.add_frame(jpeg_frame(1));
    let pending = assembler.trigger().unwrap();
    let clip_path = pending.path().to_path_buf();
    drop(assembler);

    let recorder = RecordingSink::new(SinkKind::LocalBus);
    let mut registry = SinkRegistry::new();
    registry.register(recorder.clone());
    registry.register_clip_store(Arc::new(
        DirectoryClipStore::new(dir.path().join("store"), "").unwrap(),
    ));
    let dispatcher = EventDispatcher::new(registry, settings(), bus);

    let report = dispatcher
        .dispatch(fixed_event(Some(clip_path.clone())), Some(pending))
        .await;

    assert!(matches!(
        report.outcomes[&SinkKind::BlobStorage],
        DeliveryOutcome::Failed { .. }
    ));
    let messages = recorder.messages.lock();
    assert!(messages[0].s3_url.is_none());
    assert_eq!(
        messages[0].clip_path.as_deref(),
        Some(clip_path.to_string_lossy().as_ref())
    );
}

#[tokio::test]
async fn test_background_upload_fills_slot_later() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(64);
    let (_assembler, pending) = record_clip(&dir, &bus);

    let mut registry = SinkRegistry::new();
    registry.register_clip_store(Arc::new(
        DirectoryClipStore::new(dir.path().join("store"), "").unwrap(),
    ));
    let dispatcher = EventDispatcher::new(
        registry,
        DispatchSettings {
            upload_mode: UploadMode::Background,
            ..settings()
        },
        bus,
    );

    let event = fixed_event(None);
    let report = dispatcher.dispatch(event.clone(), Some(pending)).await;
    assert!(!report.outcomes.contains_key(&SinkKind::BlobStorage));

    dispatcher.shutdown(Duration::from_secs(3)).await;
    assert!(event.clip_url().is_some());
}

fn slow_clip_fixture(dir: &TempDir, bus: &EventBus) -> (Arc<ClipAssembler>, PendingClip) {
    let assembler = Arc::new(ClipAssembler::with_writer(
        ClipBuffer::new(2, 3),
        ClipNaming::new(dir.path().join("clips"), chrono_tz::UTC, "mjpeg"),
        10,
        Arc::new(MjpegClipWriter),
        bus.clone(),
    ));
    assembler.add_frame(jpeg_frame(1));
    assembler.add_frame(jpeg_frame(2));
    let pending = assembler.trigger().unwrap();
    assembler.add_frame(jpeg_frame(3));
    (assembler, pending)
}

fn storage_dispatcher(dir: &TempDir, bus: EventBus, sink: Arc<RecordingSink>) -> EventDispatcher {
    let mut registry = SinkRegistry::new();
    registry.register(sink);
    registry.register_clip_store(Arc::new(
        DirectoryClipStore::new(dir.path().join("store"), "").unwrap(),
    ));
    EventDispatcher::new(
        registry,
        DispatchSettings {
            clip_wait: Duration::from_millis(50),
            ..settings()
        },
        bus,
    )
}

#[tokio::test]
async fn test_clip_slower_than_frame_rate_is_uploaded_late() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(64);
    let (assembler, pending) = slow_clip_fixture(&dir, &bus);
    let recorder = RecordingSink::new(SinkKind::LocalBus);
    let dispatcher = storage_dispatcher(&dir, bus, recorder.clone());

    // post-roll trickles in well after the inline wait expires
    let feeder = Arc::clone(&assembler);
    let feed = tokio::spawn(async move {
        for id in 4..6 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            feeder.add_frame(jpeg_frame(id));
        }
    });

    let event = fixed_event(None);
    let report = dispatcher.dispatch(event.clone(), Some(pending)).await;
    assert!(!report.outcomes.contains_key(&SinkKind::BlobStorage));
    assert!(recorder.messages.lock()[0].s3_url.is_none());

    feed.await.unwrap();
    dispatcher.shutdown(Duration::from_secs(3)).await;

    let url = event.clip_url().unwrap();
    assert!(url.starts_with("file://"));
    assert!(event
        .outcome(SinkKind::BlobStorage)
        .map(|o| o.is_success())
        .unwrap_or(false));
}

#[tokio::test]
async fn test_clip_cut_short_by_silence_is_uploaded_on_flush() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(64);
    let (assembler, pending) = slow_clip_fixture(&dir, &bus);
    let recorder = RecordingSink::new(SinkKind::LocalBus);
    let dispatcher = storage_dispatcher(&dir, bus, recorder.clone());

    let event = fixed_event(None);
    dispatcher.dispatch(event.clone(), Some(pending)).await;
    assert!(event.outcome(SinkKind::BlobStorage).is_none());

    assembler.shutdown(Duration::from_secs(2)).await;
    dispatcher.shutdown(Duration::from_secs(3)).await;

    assert!(event.clip_url().is_some());
}

#[tokio::test]
async fn test_spawned_dispatch_completes_before_shutdown() {
    let bus = EventBus::new(32);
    let mut completed = EventReceiver::new(
        &bus,
        EventFilter::EventTypes(vec!["delivery_completed"]),
        "test",
    );
    let recorder = RecordingSink::new(SinkKind::LocalBus);
    let mut registry = SinkRegistry::new();
    registry.register(recorder.clone());
    let dispatcher = Arc::new(EventDispatcher::new(registry, settings(), bus));

    let event = fixed_event(None);
    dispatcher.spawn_dispatch(event.clone(), None);
    dispatcher.shutdown(Duration::from_secs(2)).await;

    assert_eq!(recorder.messages.lock().len(), 1);
    assert_eq!(event.outcome(SinkKind::LocalBus), Some(DeliveryOutcome::Delivered));
    match completed.recv().await.unwrap() {
        FallwatchEvent::DeliveryCompleted {
            event_id,
            sink,
            success,
        } => {
            assert_eq!(event_id, event.id());
            assert_eq!(sink, "local_bus");
            assert!(success);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_status_goes_to_every_sink() {
    let local = RecordingSink::new(SinkKind::LocalBus);
    let cloud = RecordingSink::new(SinkKind::CloudPubSub);
    let mut registry = SinkRegistry::new();
    registry.register(local.clone());
    registry.register(cloud.clone());
    let dispatcher = EventDispatcher::new(registry, settings(), EventBus::new(32));

    assert_eq!(dispatcher.publish_status(OnlineStatus::Online).await, 2);

    let statuses = local.statuses.lock();
    assert_eq!(statuses[0].status, OnlineStatus::Online);
    assert_eq!(statuses[0].device_id, "test-device");
    assert_eq!(cloud.statuses.lock().len(), 1);
}

#[tokio::test]
async fn test_event_log_appends_json_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("events.jsonl");
    let log = JsonlEventLog::open(&path).await.unwrap();

    let first = fixed_event(None);
    let second = fixed_event(Some(PathBuf::from("/clips/b.mjpeg")));
    log.deliver(&first).await.unwrap();
    log.deliver(&second).await.unwrap();
    log.close().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event_id"], first.id().to_string());
    assert_eq!(lines[0]["event"], "fall_detected");
    assert_eq!(lines[1]["clip_path"], "/clips/b.mjpeg");
}
