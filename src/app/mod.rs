mod activity;
mod monitor;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use activity::{spawn_activity_collector, ActivityStatus, LastDelivery};
pub use monitor::{DetectionMonitor, StepOutcome};
pub use orchestrator::FallwatchOrchestrator;
pub use state::{
    CameraStatusView, DetectionStatus, SharedState, StatusQuery, SystemStatus,
    VideoSourceStatus, MAX_EVENTS_QUERY,
};
pub use types::{ComponentState, ShutdownReason};
