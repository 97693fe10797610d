mod assembler;
mod buffer;
#[cfg(all(target_os = "linux", feature = "video_encoding"))]
mod gst;
mod writer;


pub use assembler::{ClipAssembler, ClipReport, PendingClip};
pub use buffer::{ClipBuffer, ClipBufferStatus, FinishedRecording};
#[cfg(all(target_os = "linux", feature = "video_encoding"))]
pub use gst::GstClipWriter;
pub use writer::{build_writer, resolve_timezone, ClipNaming, ClipWriter, MjpegClipWriter};
