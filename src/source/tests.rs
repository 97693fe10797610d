use super::*;
use crate::config::{CameraConfig, SourceKind};
use crate::frame::placeholder_frame;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::time::{Duration, Instant, SystemTime};

const FRAME_TOPIC: &str = "novacare/camera/frames";
const STATUS_TOPIC: &str = "novacare/camera/status";

fn frame(id: u64) -> FrameData {
    FrameData::new(id, SystemTime::now(), vec![0xFF, 0xD8, 0xFF, 0xD9], 4, 4)
}

fn ingest() -> RemoteIngest {
    RemoteIngest::new(FRAME_TOPIC, STATUS_TOPIC, (640, 480), Duration::from_secs(5))
}

fn frame_payload(frame_id: u64, extra: serde_json::Value) -> Vec<u8> {
    let mut message = serde_json::json!({
        "device_id": "pi-hallway",
        "frame": BASE64.encode([0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]),
        "frame_id": frame_id,
        "timestamp": "2024-05-01T12:00:00Z",
    });
    if let (Some(target), Some(extra)) = (message.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    serde_json::to_vec(&message).unwrap()
}

#[test]
fn test_liveness_window() {
    let tracker = LivenessTracker::new(Duration::from_secs(5));
    let now = Instant::now();
    assert!(!tracker.is_alive_at(now));

    tracker.mark_at(now);
    assert!(tracker.is_alive_at(now + Duration::from_secs(4)));
    assert!(!tracker.is_alive_at(now + Duration::from_secs(6)));
}

#[test]
fn test_slot_keeps_only_newest_frame() {
    let slot = FrameSlot::new(Duration::from_secs(5));
    slot.store(frame(1));
    slot.store(frame(2));

    assert_eq!(slot.take().map(|f| f.id), Some(2));
    assert!(slot.take().is_none());
    assert_eq!(slot.received(), 2);
    assert_eq!(slot.overwritten(), 1);
    assert!(slot.is_receiving());
}

#[tokio::test]
async fn test_silent_slot_stops_receiving() {
    let slot = FrameSlot::new(Duration::from_millis(50));
    slot.store(frame(1));
    assert!(slot.is_receiving());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!slot.is_receiving());

    // The caller's fallback path must always have something to show
    let placeholder = placeholder_frame(320, 240);
    assert_eq!(placeholder.width, 320);
    assert!(!placeholder.data.is_empty());
}

#[test]
fn test_remote_frame_is_decoded() {
    let ingest = ingest();
    ingest.handle(FRAME_TOPIC, &frame_payload(42, serde_json::json!({})));

    let frame = ingest.slot().take().unwrap();
    assert_eq!(frame.id, 42);
    assert_eq!(frame.data.as_slice(), &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
    assert_eq!((frame.width, frame.height), (640, 480));
    assert!(frame.landmarks.is_none());

    let expected = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap();
    assert_eq!(frame.timestamp, SystemTime::from(expected));
}

#[test]
fn test_remote_frame_with_landmarks_and_size() {
    let ingest = ingest();
    let points: Vec<serde_json::Value> = (0..33)
        .map(|i| serde_json::json!({"x": 0.5, "y": i as f64 / 40.0, "visibility": 0.9}))
        .collect();
    ingest.handle(
        FRAME_TOPIC,
        &frame_payload(
            7,
            serde_json::json!({"width": 320, "height": 240, "landmarks": points}),
        ),
    );

    let frame = ingest.slot().take().unwrap();
    assert_eq!((frame.width, frame.height), (320, 240));
    let landmarks = frame.landmarks.unwrap();
    assert_eq!(landmarks.points().len(), 33);
    assert_eq!(landmarks.frame_size(), (320, 240));
}

#[test]
fn test_malformed_remote_messages_are_counted() {
    let ingest = ingest();
    ingest.handle(FRAME_TOPIC, b"not json");
    ingest.handle(
        FRAME_TOPIC,
        br#"{"device_id": "pi", "frame": "***not base64***"}"#,
    );
    ingest.handle("some/other/topic", b"ignored");

    assert_eq!(ingest.malformed(), 2);
    assert!(ingest.slot().take().is_none());
    assert!(!ingest.slot().is_receiving());
}

#[test]
fn test_out_of_range_timestamps_fall_back_to_now() {
    let ingest = ingest();
    for (id, timestamp) in [(1, serde_json::json!(1e300)), (2, serde_json::json!(-5.0))] {
        let before = SystemTime::now();
        ingest.handle(
            FRAME_TOPIC,
            &frame_payload(id, serde_json::json!({ "timestamp": timestamp })),
        );

        let frame = ingest.slot().take().unwrap();
        assert_eq!(frame.id, id);
        assert!(frame.timestamp >= before);
    }
    assert_eq!(ingest.malformed(), 0);

    let unix = serde_json::json!({ "timestamp": 1_714_564_800.5 });
    ingest.handle(FRAME_TOPIC, &frame_payload(3, unix));
    let frame = ingest.slot().take().unwrap();
    assert_eq!(
        frame.timestamp,
        SystemTime::UNIX_EPOCH + Duration::from_millis(1_714_564_800_500)
    );
}

#[test]
fn test_camera_status_is_tracked_per_device() {
    let ingest = ingest();
    ingest.handle(
        STATUS_TOPIC,
        br#"{"device_id": "pi-hallway", "status": "online", "timestamp": "2024-05-01T12:00:00Z"}"#,
    );
    ingest.handle(
        STATUS_TOPIC,
        br#"{"device_id": "pi-kitchen", "status": "online"}"#,
    );
    ingest.handle(
        STATUS_TOPIC,
        br#"{"device_id": "pi-hallway", "status": "offline"}"#,
    );

    let cameras = ingest.cameras();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras["pi-hallway"].status, "offline");
    assert_eq!(cameras["pi-kitchen"].status, "online");
    assert!(cameras["pi-kitchen"].reported_at.is_none());
}

#[test]
fn test_remote_source_reports_ingest_stats() {
    let source = RemoteSource::new(
        crate::config::RemoteConfig::default(),
        (640, 480),
        Duration::from_secs(5),
        Duration::from_secs(1),
    );
    assert_eq!(source.kind(), SourceKind::Remote);
    assert!(!source.is_receiving());

    source
        .ingest()
        .handle(FRAME_TOPIC, &frame_payload(1, serde_json::json!({})));
    let stats = source.stats();
    assert!(!stats.connected);
    assert!(stats.receiving);
    assert_eq!(stats.frames_received, 1);
    assert!(source.get_frame().is_some());
}

#[cfg(not(all(target_os = "linux", feature = "camera")))]
#[tokio::test]
async fn test_local_source_generates_test_pattern() {
    let config = CameraConfig {
        index: 0,
        resolution: (64, 48),
        fps: 20,
    };
    let source = LocalSource::new(config, Duration::from_secs(5));
    assert!(!source.is_receiving());

    source.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(source.is_receiving());
    let frame = source.get_frame().unwrap();
    assert_eq!((frame.width, frame.height), (64, 48));
    assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
    assert!(source.stats().frames_received > 0);

    source.disconnect().await;
    assert!(!source.stats().connected);
    assert!(!source.is_receiving());
}
