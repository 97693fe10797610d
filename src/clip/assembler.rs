use super::buffer::{ClipBuffer, ClipBufferStatus, FinishedRecording};
use super::writer::{build_writer, resolve_timezone, ClipNaming, ClipWriter};
use crate::config::ClipConfig;
use crate::error::ClipError;
use crate::events::{EventBus, FallwatchEvent};
use crate::frame::FrameData;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Completion = oneshot::Sender<Result<ClipReport, ClipError>>;

/// Outcome of a written clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipReport {
    pub path: PathBuf,
    pub frame_count: usize,
    pub pre_roll: usize,
    pub post_roll: usize,
    pub complete: bool,
    pub bytes: u64,
}

/// Handle to a clip that is still being recorded or encoded
#[derive(Debug)]
pub struct PendingClip {
    path: PathBuf,
    done: oneshot::Receiver<Result<ClipReport, ClipError>>,
}

impl PendingClip {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the clip is on disk, or give up after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<ClipReport, ClipError> {
        let seconds = timeout.as_secs();
        match self.try_wait(timeout).await {
            Ok(result) => result,
            Err(pending) => Err(ClipError::Timeout {
                path: pending.path,
                seconds,
            }),
        }
    }

    /// Like `wait`, but hands the clip back when `timeout` expires
    pub async fn try_wait(
        mut self,
        timeout: Duration,
    ) -> Result<Result<ClipReport, ClipError>, PendingClip> {
        match tokio::time::timeout(timeout, &mut self.done).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Ok(Err(ClipError::EncoderClosed)),
            Err(_) => Err(self),
        }
    }

    /// Wait with no deadline.
    ///
    /// Resolves once post-roll fills, or when the assembler shuts down and
    /// flushes the partial recording.
    pub async fn finished(self) -> Result<ClipReport, ClipError> {
        self.done.await.unwrap_or(Err(ClipError::EncoderClosed))
    }
}

struct EncodeJob {
    recording: FinishedRecording,
    completion: Option<Completion>,
}

/// Ring buffer and recording guarded together since one frame mutates both
struct AssemblyState {
    buffer: ClipBuffer,
    completion: Option<Completion>,
}

/// Pre/post-roll clip assembly with a background encoder.
///
/// `add_frame` and `trigger` only touch the in-memory buffers; encoding and
/// file I/O happen on the worker so the detection loop never waits on disk.
pub struct ClipAssembler {
    state: Mutex<AssemblyState>,
    naming: ClipNaming,
    fps: u32,
    jobs: Mutex<Option<mpsc::UnboundedSender<EncodeJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    event_bus: EventBus,
}

impl ClipAssembler {
    /// Build from configuration; must be called inside a tokio runtime.
    pub fn new(config: &ClipConfig, fps: u32, event_bus: EventBus) -> Self {
        let writer = build_writer(config.container);
        let naming = ClipNaming::new(
            &config.directory,
            resolve_timezone(&config.timezone),
            writer.extension(),
        );
        let buffer = ClipBuffer::for_rate(fps, config.pre_roll_seconds, config.post_roll_seconds);
        Self::with_writer(buffer, naming, fps, writer, event_bus)
    }

    pub fn with_writer(
        buffer: ClipBuffer,
        naming: ClipNaming,
        fps: u32,
        writer: Arc<dyn ClipWriter>,
        event_bus: EventBus,
    ) -> Self {
        if let Err(e) = std::fs::create_dir_all(naming.directory()) {
            warn!(
                "Clip directory {} could not be created: {}",
                naming.directory().display(),
                e
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(encode_worker(rx, writer, fps, event_bus.clone()));

        Self {
            state: Mutex::new(AssemblyState {
                buffer,
                completion: None,
            }),
            naming,
            fps,
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            event_bus,
        }
    }

    /// Feed one frame; finishing the post-roll queues the clip for encoding.
    pub fn add_frame(&self, frame: FrameData) {
        let job = {
            let mut state = self.state.lock();
            state.buffer.push(frame).map(|recording| EncodeJob {
                recording,
                completion: state.completion.take(),
            })
        };

        if let Some(job) = job {
            self.submit(job);
        }
    }

    /// Start a recording named from the current wall-clock time.
    ///
    /// Returns `None` while another recording is in progress; that recording
    /// continues untouched.
    pub fn trigger(&self) -> Option<PendingClip> {
        let path = self.naming.path_for(Utc::now());
        let (tx, rx) = oneshot::channel();

        let pre_roll = {
            let mut state = self.state.lock();
            if !state.buffer.trigger(path.clone()) {
                return None;
            }
            state.completion = Some(tx);
            state.buffer.status().recording_frames
        };

        info!(
            "Clip recording started: {} ({} pre-roll frames)",
            path.display(),
            pre_roll
        );
        let _ = self.event_bus.publish(FallwatchEvent::ClipStarted { path: path.clone() });

        Some(PendingClip { path, done: rx })
    }

    /// Queue a partial recording for encoding instead of dropping it.
    ///
    /// Returns the path of the flushed clip, if there was one.
    pub fn force_finalize(&self) -> Option<PathBuf> {
        let job = {
            let mut state = self.state.lock();
            let recording = state.buffer.force_finalize()?;
            EncodeJob {
                recording,
                completion: state.completion.take(),
            }
        };

        let path = job.recording.path.clone();
        info!(
            "Flushing partial clip {} with {} post-roll frames",
            path.display(),
            job.recording.post_roll
        );
        self.submit(job);
        Some(path)
    }

    fn submit(&self, job: EncodeJob) {
        let jobs = self.jobs.lock();
        let Some(sender) = jobs.as_ref() else {
            warn!(
                "Clip encoder stopped; dropping {}",
                job.recording.path.display()
            );
            return;
        };

        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            warn!(
                "Clip encoder closed; dropping {}",
                job.recording.path.display()
            );
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().buffer.is_recording()
    }

    pub fn status(&self) -> ClipBufferStatus {
        self.state.lock().buffer.status()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn directory(&self) -> &Path {
        self.naming.directory()
    }

    /// Flush any partial recording, then let the encoder finish queued jobs.
    pub async fn shutdown(&self, timeout: Duration) {
        self.force_finalize();
        self.jobs.lock().take();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("Clip encoder drained"),
                Ok(Err(e)) => error!("Clip encoder task failed: {}", e),
                Err(_) => warn!(
                    "Clip encoder still busy after {}s, abandoning queued clips",
                    timeout.as_secs()
                ),
            }
        }
    }
}

async fn encode_worker(
    mut jobs: mpsc::UnboundedReceiver<EncodeJob>,
    writer: Arc<dyn ClipWriter>,
    fps: u32,
    event_bus: EventBus,
) {
    debug!("Clip encoder started");

    while let Some(job) = jobs.recv().await {
        let EncodeJob {
            recording,
            completion,
        } = job;
        let path = recording.path.clone();

        let result = encode(writer.clone(), recording, fps).await;

        let event = match &result {
            Ok(report) => {
                info!(
                    "Clip finalized: {} ({} frames, {} bytes{})",
                    report.path.display(),
                    report.frame_count,
                    report.bytes,
                    if report.complete { "" } else { ", partial" }
                );
                FallwatchEvent::ClipFinalized {
                    path: report.path.clone(),
                    frame_count: report.frame_count,
                    complete: report.complete,
                }
            }
            Err(e) => {
                error!("Clip {} failed: {}", path.display(), e);
                FallwatchEvent::ClipFailed {
                    path: path.clone(),
                    error: e.to_string(),
                }
            }
        };
        let _ = event_bus.publish(event);

        if let Some(completion) = completion {
            let _ = completion.send(result);
        }
    }

    debug!("Clip encoder stopped");
}

async fn encode(
    writer: Arc<dyn ClipWriter>,
    recording: FinishedRecording,
    fps: u32,
) -> Result<ClipReport, ClipError> {
    let path = recording.path.clone();

    tokio::task::spawn_blocking(move || {
        if let Some(parent) = recording.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ClipError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let bytes = writer.write_clip(&recording.path, &recording.frames, fps)?;
        Ok(ClipReport {
            frame_count: recording.frames.len(),
            path: recording.path,
            pre_roll: recording.pre_roll,
            post_roll: recording.post_roll,
            complete: recording.complete,
            bytes,
        })
    })
    .await
    .unwrap_or_else(|e| {
        Err(ClipError::Encoding {
            details: format!("encoder thread for {} failed: {}", path.display(), e),
        })
    })
}
