use super::{FrameSlot, FrameSource, SourceStats};
use crate::config::{CameraConfig, SourceKind};
use crate::error::SourceError;
use crate::frame::FrameData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[cfg(all(target_os = "linux", feature = "camera"))]
use gstreamer::prelude::*;
#[cfg(all(target_os = "linux", feature = "camera"))]
use gstreamer::Pipeline;
#[cfg(all(target_os = "linux", feature = "camera"))]
use gstreamer_app::AppSink;
#[cfg(all(target_os = "linux", feature = "camera"))]
use gstreamer_video::VideoInfo;

const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Directly attached camera.
///
/// Uses a V4L2 MJPEG pipeline when built with the `camera` feature on Linux,
/// and a synthetic test pattern otherwise.
pub struct LocalSource {
    config: CameraConfig,
    slot: Arc<FrameSlot>,
    frame_counter: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
    capture_task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalSource {
    pub fn new(config: CameraConfig, liveness_window: Duration) -> Self {
        info!(
            "Local camera source for device {} ({}x{} @ {}fps)",
            config.index, config.resolution.0, config.resolution.1, config.fps
        );

        Self {
            config,
            slot: Arc::new(FrameSlot::new(liveness_window)),
            frame_counter: Arc::new(AtomicU64::new(0)),
            is_running: Arc::new(AtomicBool::new(false)),
            capture_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    #[cfg(all(target_os = "linux", feature = "camera"))]
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
            self.config.index, width, height, self.config.fps
        )
    }

    #[cfg(all(target_os = "linux", feature = "camera"))]
    fn start_capture(&self) -> Result<JoinHandle<()>, SourceError> {
        let configuration = |details: String| SourceError::Configuration { details };

        gstreamer::init().map_err(|e| configuration(format!("Failed to initialize GStreamer: {}", e)))?;

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| configuration(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| configuration("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| configuration("Failed to get appsink".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| configuration("Failed to downcast to AppSink".to_string()))?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    let _ = tx.send(sample);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| SourceError::CaptureStream {
                details: format!("Failed to start pipeline: {}", e),
            })?;
        info!("GStreamer camera pipeline started");

        let is_running = Arc::clone(&self.is_running);
        let frame_counter = Arc::clone(&self.frame_counter);
        let slot = Arc::clone(&self.slot);

        Ok(tokio::spawn(async move {
            let mut last_sample = tokio::time::Instant::now();
            let mut watchdog = tokio::time::interval(Duration::from_secs(1));
            let stall_timeout = slot.liveness().window();

            while is_running.load(Ordering::Relaxed) {
                tokio::select! {
                    sample = rx.recv() => {
                        let Some(sample) = sample else { break };
                        match frame_from_sample(&sample, &frame_counter) {
                            Ok(frame) => slot.store(frame),
                            Err(e) => error!("Error processing camera sample: {}", e),
                        }
                        last_sample = tokio::time::Instant::now();
                    }
                    _ = watchdog.tick() => {
                        if last_sample.elapsed() >= stall_timeout {
                            warn!("No camera frames for {:?}; restarting pipeline", stall_timeout);
                            let _ = pipeline.set_state(gstreamer::State::Null);
                            if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
                                error!("Failed to restart camera pipeline: {}", e);
                            }
                            last_sample = tokio::time::Instant::now();
                        }
                    }
                }
            }

            let _ = pipeline.set_state(gstreamer::State::Null);
            info!("Camera capture loop stopped");
        }))
    }

    #[cfg(not(all(target_os = "linux", feature = "camera")))]
    fn start_capture(&self) -> Result<JoinHandle<()>, SourceError> {
        warn!("Built without camera support; generating a synthetic test pattern");

        let (width, height) = self.config.resolution;
        let patterns = test_pattern(width, height)?;
        let fps = self.config.fps.max(1);
        let is_running = Arc::clone(&self.is_running);
        let frame_counter = Arc::clone(&self.frame_counter);
        let slot = Arc::clone(&self.slot);

        Ok(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_micros(1_000_000 / fps as u64));

            while is_running.load(Ordering::Relaxed) {
                ticker.tick().await;
                let id = frame_counter.fetch_add(1, Ordering::Relaxed);
                let data = Arc::clone(&patterns[id as usize % patterns.len()]);
                trace!("Generated test frame {}", id);
                slot.store(FrameData::from_shared(id, SystemTime::now(), data, width, height));
            }

            info!("Test pattern loop stopped");
        }))
    }
}

#[cfg(all(target_os = "linux", feature = "camera"))]
fn frame_from_sample(
    sample: &gstreamer::Sample,
    frame_counter: &AtomicU64,
) -> Result<FrameData, SourceError> {
    let stream = |details: String| SourceError::CaptureStream { details };

    let buffer = sample
        .buffer()
        .ok_or_else(|| stream("No buffer in sample".to_string()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| stream("No caps in sample".to_string()))?;
    let info = VideoInfo::from_caps(caps)
        .map_err(|e| stream(format!("Failed to get video info: {}", e)))?;
    let map = buffer
        .map_readable()
        .map_err(|e| stream(format!("Failed to map buffer: {}", e)))?;

    let id = frame_counter.fetch_add(1, Ordering::Relaxed);
    trace!("Captured frame {} ({} bytes)", id, map.len());

    Ok(FrameData::new(
        id,
        SystemTime::now(),
        map.as_slice().to_vec(),
        info.width(),
        info.height(),
    ))
}

/// A few grey levels so consecutive test frames differ
#[cfg(not(all(target_os = "linux", feature = "camera")))]
fn test_pattern(width: u32, height: u32) -> Result<Vec<Arc<Vec<u8>>>, SourceError> {
    [60u8, 90, 120, 150]
        .iter()
        .map(|shade| {
            crate::frame::encode_solid_jpeg(width, height, [*shade, *shade, *shade], 60)
                .map(Arc::new)
                .map_err(|e| SourceError::Configuration {
                    details: format!("Failed to encode test pattern: {}", e),
                })
        })
        .collect()
}

#[async_trait]
impl FrameSource for LocalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn connect(&self) -> Result<(), SourceError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("Local camera already capturing");
            return Ok(());
        }

        match self.start_capture() {
            Ok(task) => {
                *self.capture_task.lock() = Some(task);
                info!("Local camera capture started");
                Ok(())
            }
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn get_frame(&self) -> Option<FrameData> {
        self.slot.take()
    }

    fn is_receiving(&self) -> bool {
        self.slot.is_receiving()
    }

    async fn disconnect(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping local camera capture");
        let task = self.capture_task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Capture task completed"),
                Ok(Err(e)) => error!("Capture task failed: {}", e),
                Err(_) => warn!("Capture task did not stop within {:?}", STOP_TIMEOUT),
            }
        }
        self.slot.clear();
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            connected: self.is_running.load(Ordering::Relaxed),
            receiving: self.slot.is_receiving(),
            frames_received: self.slot.received(),
            frames_overwritten: self.slot.overwritten(),
            seconds_since_last_frame: self.slot.liveness().silence().map(|d| d.as_secs_f64()),
            remote_cameras: Default::default(),
        }
    }
}
