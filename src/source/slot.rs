use crate::frame::FrameData;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks whether frames keep arriving within a window
#[derive(Debug)]
pub struct LivenessTracker {
    window: Duration,
    last_arrival: Mutex<Option<Instant>>,
}

impl LivenessTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_arrival: Mutex::new(None),
        }
    }

    pub fn mark(&self) {
        self.mark_at(Instant::now());
    }

    pub fn mark_at(&self, at: Instant) {
        *self.last_arrival.lock() = Some(at);
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Instant::now())
    }

    /// False before the first arrival and once the window has elapsed
    pub fn is_alive_at(&self, now: Instant) -> bool {
        match *self.last_arrival.lock() {
            Some(last) => now.saturating_duration_since(last) <= self.window,
            None => false,
        }
    }

    pub fn silence(&self) -> Option<Duration> {
        self.last_arrival.lock().map(|last| last.elapsed())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clear(&self) {
        *self.last_arrival.lock() = None;
    }
}

/// Single most-recent frame; a new frame replaces one nobody consumed yet.
#[derive(Debug)]
pub struct FrameSlot {
    latest: Mutex<Option<FrameData>>,
    liveness: LivenessTracker,
    received: AtomicU64,
    overwritten: AtomicU64,
}

impl FrameSlot {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            latest: Mutex::new(None),
            liveness: LivenessTracker::new(liveness_window),
            received: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    pub fn store(&self, frame: FrameData) {
        let replaced = self.latest.lock().replace(frame);
        if replaced.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        self.liveness.mark();
    }

    /// Take the newest unconsumed frame without waiting
    pub fn take(&self) -> Option<FrameData> {
        self.latest.lock().take()
    }

    pub fn is_receiving(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Frames replaced before anyone took them
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.latest.lock().take();
        self.liveness.clear();
    }
}
