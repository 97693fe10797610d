use crate::frame::FrameData;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Frames between a trigger and finalize
#[derive(Debug)]
struct RecordingSession {
    path: PathBuf,
    frames: Vec<FrameData>,
    pre_roll: usize,
    post_captured: usize,
}

/// A recording handed off for encoding
#[derive(Debug)]
pub struct FinishedRecording {
    pub path: PathBuf,
    /// Pre-roll followed by post-trigger frames, in arrival order
    pub frames: Vec<FrameData>,
    pub pre_roll: usize,
    pub post_roll: usize,
    /// False when flushed before the post-roll filled up
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClipBufferStatus {
    pub buffered_frames: usize,
    pub capacity: usize,
    pub recording: bool,
    pub recording_frames: usize,
}

/// Pre-roll ring plus the optional in-progress recording.
///
/// The ring is fed on every push regardless of recording state, so it always
/// trails the newest frame by up to the pre-roll length.
#[derive(Debug)]
pub struct ClipBuffer {
    ring: VecDeque<FrameData>,
    capacity: usize,
    post_roll_frames: usize,
    recording: Option<RecordingSession>,
}

impl ClipBuffer {
    pub fn new(pre_roll_frames: usize, post_roll_frames: usize) -> Self {
        let capacity = pre_roll_frames.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            post_roll_frames: post_roll_frames.max(1),
            recording: None,
        }
    }

    /// Sized from a frame rate and pre/post-roll durations in seconds
    pub fn for_rate(fps: u32, pre_roll_seconds: u32, post_roll_seconds: u32) -> Self {
        Self::new(
            (fps * pre_roll_seconds) as usize,
            (fps * post_roll_seconds) as usize,
        )
    }

    /// Ingest one frame; returns the recording once its post-roll is full.
    pub fn push(&mut self, frame: FrameData) -> Option<FinishedRecording> {
        let mut finished = false;
        if let Some(session) = self.recording.as_mut() {
            session.frames.push(frame.clone());
            session.post_captured += 1;
            finished = session.post_captured >= self.post_roll_frames;
        }

        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(frame);

        if finished {
            self.finish(true)
        } else {
            None
        }
    }

    /// Start recording into `path` with the current ring as head.
    ///
    /// Returns false, leaving the active recording untouched, if one is
    /// already in progress.
    pub fn trigger(&mut self, path: PathBuf) -> bool {
        if self.recording.is_some() {
            return false;
        }

        let frames: Vec<FrameData> = self.ring.iter().cloned().collect();
        self.recording = Some(RecordingSession {
            path,
            pre_roll: frames.len(),
            frames,
            post_captured: 0,
        });
        true
    }

    /// Flush a partial recording instead of discarding it
    pub fn force_finalize(&mut self) -> Option<FinishedRecording> {
        let complete = self
            .recording
            .as_ref()
            .map(|s| s.post_captured >= self.post_roll_frames)?;
        self.finish(complete)
    }

    fn finish(&mut self, complete: bool) -> Option<FinishedRecording> {
        let session = self.recording.take()?;
        Some(FinishedRecording {
            path: session.path,
            post_roll: session.post_captured,
            pre_roll: session.pre_roll,
            frames: session.frames,
            complete,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn recording_path(&self) -> Option<&Path> {
        self.recording.as_ref().map(|s| s.path.as_path())
    }

    pub fn status(&self) -> ClipBufferStatus {
        ClipBufferStatus {
            buffered_frames: self.ring.len(),
            capacity: self.capacity,
            recording: self.recording.is_some(),
            recording_frames: self.recording.as_ref().map_or(0, |s| s.frames.len()),
        }
    }
}
