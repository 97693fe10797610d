pub mod app;
pub mod clip;
pub mod config;
#[cfg(feature = "dashboard")]
pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod frame;
pub mod mqtt;
pub mod pose;
pub mod source;

pub use app::{ComponentState, FallwatchOrchestrator, ShutdownReason, StatusQuery, SystemStatus};
pub use clip::{ClipAssembler, PendingClip};
pub use config::FallwatchConfig;
pub use dispatch::{EventDispatcher, EventSink, FallEvent, SinkRegistry};
pub use error::{FallwatchError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, FallwatchEvent};
pub use frame::FrameData;
pub use pose::{FallClassifier, LandmarkSnapshot, PoseEstimator};
pub use source::FrameSource;

#[cfg(feature = "dashboard")]
pub use dashboard::DashboardServer;
