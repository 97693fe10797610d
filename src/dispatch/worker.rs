use super::event::{DeliveryOutcome, FallEvent};
use super::metrics::SinkMetrics;
use super::sink::EventSink;
use crate::events::{EventBus, FallwatchEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

/// Queue plus worker task for one fire-and-forget sink
pub struct SinkWorker {
    name: String,
    tx: mpsc::Sender<FallEvent>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkWorker {
    pub fn spawn(
        sink: Arc<dyn EventSink>,
        metrics: Arc<SinkMetrics>,
        queue_capacity: usize,
        event_bus: EventBus,
    ) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, event_bus, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue an event without waiting; false if it was dropped
    pub fn try_send(&self, event: FallEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.inc_dropped_count();
                warn!(sink = %self.name, event_id = %event.id(), "Queue full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!(sink = %self.name, event_id = %event.id(), "Sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Let the worker drain its queue, bounded by `timeout`
    #[instrument(name = "sink_worker_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self, timeout: Duration) {
        drop(self.tx);
        let abort = self.worker_handle.abort_handle();
        match tokio::time::timeout(timeout, self.worker_handle).await {
            Ok(Ok(())) => debug!(sink = %self.name, "Sink worker drained"),
            Ok(Err(e)) => error!(sink = %self.name, error = ?e, "Worker task panicked"),
            Err(_) => {
                warn!(sink = %self.name, "Sink worker did not drain in time");
                abort.abort();
            }
        }
    }
}

#[instrument(name = "sink_worker_loop", skip(sink, rx, metrics, event_bus), fields(sink = %name))]
async fn sink_worker(
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::Receiver<FallEvent>,
    metrics: Arc<SinkMetrics>,
    event_bus: EventBus,
    name: String,
) {
    debug!(sink = %name, "Sink worker started");

    while let Some(event) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        let success = match sink.deliver(&event).await {
            Ok(()) => {
                metrics.inc_write_count();
                event.record_outcome(sink.kind(), DeliveryOutcome::Delivered);
                true
            }
            Err(e) => {
                metrics.record_failure(&e);
                error!(sink = %name, event_id = %event.id(), error = %e, "Delivery failed");
                event.record_outcome(sink.kind(), DeliveryOutcome::failed(&e));
                false
            }
        };

        let _ = event_bus.publish(FallwatchEvent::DeliveryCompleted {
            event_id: event.id(),
            sink: sink.kind().as_str(),
            success,
        });
    }

    debug!(sink = %name, "Sink worker stopped");
}
