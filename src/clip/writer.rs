use crate::config::ClipContainer;
use crate::error::ClipError;
use crate::frame::FrameData;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// "Write this sequence of frames to a named clip"
pub trait ClipWriter: Send + Sync {
    /// File extension of produced clips, without the dot
    fn extension(&self) -> &'static str;

    /// Write `frames` to `path`, returning the number of bytes written.
    ///
    /// Runs on a blocking thread.
    fn write_clip(&self, path: &Path, frames: &[FrameData], fps: u32) -> Result<u64, ClipError>;
}

/// Concatenated JPEG stream playable by most MJPEG-aware players
#[derive(Debug, Default)]
pub struct MjpegClipWriter;

impl ClipWriter for MjpegClipWriter {
    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn write_clip(&self, path: &Path, frames: &[FrameData], _fps: u32) -> Result<u64, ClipError> {
        if frames.is_empty() {
            return Err(ClipError::Empty {
                path: path.to_path_buf(),
            });
        }

        let write_err = |source| ClipError::Write {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;
        for frame in frames {
            writer.write_all(&frame.data).map_err(write_err)?;
            written += frame.data.len() as u64;
        }
        writer.flush().map_err(write_err)?;

        debug!(
            "Wrote {} frames ({} bytes) to {}",
            frames.len(),
            written,
            path.display()
        );
        Ok(written)
    }
}

/// Pick the writer for a container, falling back to MJPEG when this build
/// has no encoder.
pub fn build_writer(container: ClipContainer) -> Arc<dyn ClipWriter> {
    match container {
        ClipContainer::Mjpeg => Arc::new(MjpegClipWriter),
        ClipContainer::Mp4 => {
            #[cfg(all(target_os = "linux", feature = "video_encoding"))]
            {
                Arc::new(super::gst::GstClipWriter)
            }

            #[cfg(not(all(target_os = "linux", feature = "video_encoding")))]
            {
                warn!("MP4 clips need the video_encoding feature; writing MJPEG instead");
                Arc::new(MjpegClipWriter)
            }
        }
    }
}

/// Clip naming in a configured wall-clock timezone
#[derive(Debug, Clone)]
pub struct ClipNaming {
    directory: PathBuf,
    timezone: Tz,
    extension: &'static str,
}

impl ClipNaming {
    pub fn new(directory: impl Into<PathBuf>, timezone: Tz, extension: &'static str) -> Self {
        Self {
            directory: directory.into(),
            timezone,
            extension,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `<dir>/fall_<YYYYmmdd_HHMMSS>_<unix>.<ext>`
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        let local = at.with_timezone(&self.timezone);
        self.directory.join(format!(
            "fall_{}_{}.{}",
            local.format("%Y%m%d_%H%M%S"),
            at.timestamp(),
            self.extension
        ))
    }
}

/// Resolve an IANA timezone name, defaulting to UTC
pub fn resolve_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Unknown clip timezone '{}', defaulting to UTC", name);
            chrono_tz::UTC
        }
    }
}
