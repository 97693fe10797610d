use crate::error::EventBusError;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Events exchanged between fallwatch components
#[derive(Debug, Clone)]
pub enum FallwatchEvent {
    /// The classifier accepted a fall
    FallDetected {
        event_id: Uuid,
        confidence: f64,
        timestamp: SystemTime,
    },
    /// A clip recording started for a fall
    ClipStarted { path: PathBuf },
    /// A clip was written to disk
    ClipFinalized {
        path: PathBuf,
        frame_count: usize,
        complete: bool,
    },
    /// A clip could not be written
    ClipFailed { path: PathBuf, error: String },
    /// The frame source started or stopped delivering frames
    SourceStatusChanged {
        receiving: bool,
        timestamp: SystemTime,
    },
    /// One sink finished handling an event
    DeliveryCompleted {
        event_id: Uuid,
        sink: &'static str,
        success: bool,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl FallwatchEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            FallwatchEvent::FallDetected {
                event_id,
                confidence,
                ..
            } => format!("Fall {} detected ({:.1}%)", event_id, confidence * 100.0),
            FallwatchEvent::ClipStarted { path } => {
                format!("Clip recording started: {}", path.display())
            }
            FallwatchEvent::ClipFinalized {
                path,
                frame_count,
                complete,
            } => format!(
                "Clip finalized: {} ({} frames{})",
                path.display(),
                frame_count,
                if *complete { "" } else { ", partial" }
            ),
            FallwatchEvent::ClipFailed { path, error } => {
                format!("Clip {} failed: {}", path.display(), error)
            }
            FallwatchEvent::SourceStatusChanged { receiving, .. } => format!(
                "Frame source {}",
                if *receiving { "receiving" } else { "silent" }
            ),
            FallwatchEvent::DeliveryCompleted {
                event_id,
                sink,
                success,
            } => format!(
                "Delivery of {} via {} {}",
                event_id,
                sink,
                if *success { "succeeded" } else { "failed" }
            ),
            FallwatchEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            FallwatchEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            FallwatchEvent::FallDetected { .. } => "fall_detected",
            FallwatchEvent::ClipStarted { .. } => "clip_started",
            FallwatchEvent::ClipFinalized { .. } => "clip_finalized",
            FallwatchEvent::ClipFailed { .. } => "clip_failed",
            FallwatchEvent::SourceStatusChanged { .. } => "source_status_changed",
            FallwatchEvent::DeliveryCompleted { .. } => "delivery_completed",
            FallwatchEvent::SystemError { .. } => "system_error",
            FallwatchEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Broadcast bus for component coordination.
///
/// Publishing never blocks, so it is safe to call from the detection loop and
/// from blocking encoder threads alike.
pub struct EventBus {
    sender: broadcast::Sender<FallwatchEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    pub fn with_debug_logging(capacity: usize) -> Self {
        let mut bus = Self::new(capacity);
        bus.debug_logging = true;
        bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FallwatchEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers; an error only means nobody listens.
    pub fn publish(&self, event: FallwatchEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Event: {}", event.description());
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    pub fn matches(&self, event: &FallwatchEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Named receiver that only yields events passing its filter
pub struct EventReceiver {
    receiver: broadcast::Receiver<FallwatchEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(bus: &EventBus, filter: EventFilter, name: impl Into<String>) -> Self {
        Self {
            receiver: bus.subscribe(),
            filter,
            name: name.into(),
        }
    }

    /// Receive the next filtered event.
    ///
    /// A lag is reported once and the receiver keeps going from the oldest
    /// retained event.
    pub async fn recv(&mut self) -> Result<FallwatchEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
