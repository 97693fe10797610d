use super::writer::ClipWriter;
use crate::error::ClipError;
use crate::frame::FrameData;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

const EOS_TIMEOUT_SECONDS: u64 = 30;

/// H.264 in MP4 through a software GStreamer pipeline
#[derive(Debug, Default)]
pub struct GstClipWriter;

fn encoding_error(details: impl Into<String>) -> ClipError {
    ClipError::Encoding {
        details: details.into(),
    }
}

fn nanos_since_epoch(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

impl ClipWriter for GstClipWriter {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn write_clip(&self, path: &Path, frames: &[FrameData], fps: u32) -> Result<u64, ClipError> {
        if frames.is_empty() {
            return Err(ClipError::Empty {
                path: path.to_path_buf(),
            });
        }

        // Encoding must not starve the detection loop
        {
            use libc::{setpriority, PRIO_PROCESS};
            let _ = unsafe { setpriority(PRIO_PROCESS as u32, 0, 10) };
        }

        gstreamer::init().map_err(|e| encoding_error(format!("GStreamer init: {}", e)))?;

        let fps = fps.max(1);
        let pipeline_desc = format!(
            "appsrc name=src format=time is-live=false caps=image/jpeg,framerate={}/1 ! \
             jpegparse ! jpegdec ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset=veryfast key-int-max={} ! \
             h264parse config-interval=1 ! \
             mp4mux faststart=true ! \
             filesink location={}",
            fps,
            fps * 2,
            path.to_string_lossy()
        );
        debug!("Clip pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| encoding_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| encoding_error("Failed to downcast to Pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| encoding_error("Failed to get appsrc element"))?
            .downcast::<AppSrc>()
            .map_err(|_| encoding_error("Failed to downcast to AppSrc"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| encoding_error(format!("Failed to start pipeline: {}", e)))?;

        let result = push_frames(&appsrc, frames, fps).and_then(|_| wait_for_eos(&pipeline));
        let _ = pipeline.set_state(gstreamer::State::Null);
        result?;

        let bytes = std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|source| ClipError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        info!(
            "Encoded {} frames into {} ({} bytes)",
            frames.len(),
            path.display(),
            bytes
        );
        Ok(bytes)
    }
}

fn push_frames(appsrc: &AppSrc, frames: &[FrameData], fps: u32) -> Result<(), ClipError> {
    let nominal = 1_000_000_000 / fps as u64;
    let base = nanos_since_epoch(frames[0].timestamp);

    for (index, frame) in frames.iter().enumerate() {
        let at = nanos_since_epoch(frame.timestamp);
        let duration = frames
            .get(index + 1)
            .map(|next| nanos_since_epoch(next.timestamp).saturating_sub(at))
            .filter(|d| *d > 0)
            .unwrap_or(nominal);

        let mut buffer = gstreamer::Buffer::from_slice(frame.data.as_ref().clone());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| encoding_error("Frame buffer is shared"))?;
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(at.saturating_sub(base)));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(duration));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| encoding_error(format!("Failed to push buffer: {:?}", e)))?;
    }

    appsrc
        .end_of_stream()
        .map_err(|e| encoding_error(format!("Failed to signal EOS: {:?}", e)))?;
    Ok(())
}

fn wait_for_eos(pipeline: &Pipeline) -> Result<(), ClipError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| encoding_error("Pipeline has no bus"))?;

    for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS)) {
        match msg.view() {
            gstreamer::MessageView::Eos(..) => return Ok(()),
            gstreamer::MessageView::Error(err) => {
                return Err(encoding_error(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().unwrap_or_default()
                )));
            }
            _ => {}
        }
    }

    Err(encoding_error(format!(
        "No end of stream within {}s",
        EOS_TIMEOUT_SECONDS
    )))
}
