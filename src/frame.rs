use crate::pose::LandmarkSnapshot;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Fill colour of the "no signal" frame
const PLACEHOLDER_SHADE: [u8; 3] = [30, 30, 30];
const PLACEHOLDER_QUALITY: u8 = 70;

/// One JPEG-encoded video frame.
///
/// The payload is immutable and reference counted, so handing a frame to the
/// ring buffer, a recording and the dashboard never copies image bytes.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Frame identifier, monotonically increasing per source
    pub id: u64,
    /// Capture timestamp
    pub timestamp: SystemTime,
    /// JPEG bytes
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Body landmarks computed upstream, when the producer ships them
    pub landmarks: Option<Arc<LandmarkSnapshot>>,
}

impl FrameData {
    pub fn new(id: u64, timestamp: SystemTime, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::from_shared(id, timestamp, Arc::new(data), width, height)
    }

    /// Build a frame around an already shared payload
    pub fn from_shared(
        id: u64,
        timestamp: SystemTime,
        data: Arc<Vec<u8>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id,
            timestamp,
            data,
            width,
            height,
            landmarks: None,
        }
    }

    pub fn with_landmarks(mut self, landmarks: LandmarkSnapshot) -> Self {
        self.landmarks = Some(Arc::new(landmarks));
        self
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn is_older_than(&self, duration: Duration) -> bool {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|age| age > duration)
            .unwrap_or(false)
    }
}

/// Encode a single-colour JPEG
pub fn encode_solid_jpeg(
    width: u32,
    height: u32,
    shade: [u8; 3],
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let image = RgbImage::from_pixel(width.max(1), height.max(1), Rgb(shade));
    let mut jpeg = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
        encoder.encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )?;
    }
    Ok(jpeg)
}

/// Encode a flat dark-grey JPEG used whenever no real frame is available.
pub fn encode_placeholder_jpeg(width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let jpeg = encode_solid_jpeg(width, height, PLACEHOLDER_SHADE, PLACEHOLDER_QUALITY)?;

    debug!(
        "Encoded {}x{} placeholder frame ({} bytes)",
        width,
        height,
        jpeg.len()
    );

    Ok(jpeg)
}

/// Placeholder frame sized like the configured camera output.
///
/// Falls back to a bare JPEG marker pair if the encoder fails so callers never
/// have to handle an error on the no-signal path.
pub fn placeholder_frame(width: u32, height: u32) -> FrameData {
    let data = encode_placeholder_jpeg(width, height).unwrap_or_else(|e| {
        tracing::warn!("Placeholder encoding failed: {}", e);
        vec![0xFF, 0xD8, 0xFF, 0xD9]
    });
    FrameData::new(0, SystemTime::now(), data, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_jpeg() {
        let frame = placeholder_frame(64, 48);

        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame.data[frame.data.len() - 2..], &[0xFF, 0xD9]);
        assert!(frame.landmarks.is_none());
    }

    #[test]
    fn test_clone_shares_payload() {
        let frame = FrameData::new(7, SystemTime::now(), vec![1, 2, 3], 2, 2);
        let copy = frame.clone();

        assert!(Arc::ptr_eq(&frame.data, &copy.data));
        assert_eq!(copy.id, 7);
    }

    #[test]
    fn test_frame_age() {
        let old = FrameData::new(
            1,
            SystemTime::now() - Duration::from_secs(3),
            vec![0],
            1,
            1,
        );

        assert!(old.is_older_than(Duration::from_secs(1)));
        assert!(old.age_ms() >= 3000);
    }
}
