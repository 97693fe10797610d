mod dispatcher;
mod event;
mod metrics;
mod registry;
mod sink;
pub mod sinks;
mod worker;

#[cfg(test)]
mod tests;

pub use dispatcher::{DispatchReport, DispatchSettings, EventDispatcher, SinkStatus};
pub use event::{
    DeliveryOutcome, FallEvent, FallEventMessage, FallEventSummary, FallRecord, OnlineStatus,
    StatusMessage, FALL_DETECTED,
};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::{SinkRegistry, SinkState};
pub use sink::{ClipStore, Delivery, EventSink, SinkKind};
pub use worker::SinkWorker;
