use super::{ComponentState, FallwatchOrchestrator};
use crate::dispatch::OnlineStatus;
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl FallwatchOrchestrator {
    /// Stop the pipeline in dependency order.
    ///
    /// Monitor first so no new frames arrive, then the partial clip, then
    /// presence and in-flight deliveries, and the source last.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        let drain = self.config.drain_timeout();
        let mut exit_code = 0;

        self.monitor_token.cancel();
        if let Some(handle) = self.monitor_handle.take() {
            if !self.join_component("monitor", handle, MONITOR_STOP_TIMEOUT).await {
                exit_code = 1;
            }
        }

        self.stop_component("clip", drain, self.assembler.shutdown(drain))
            .await;

        let published = self.dispatcher.publish_status(OnlineStatus::Offline).await;
        info!(published, "Offline status sent");

        self.stop_component("dispatch", drain * 2, self.dispatcher.shutdown(drain))
            .await;

        if !self
            .stop_component("source", SOURCE_STOP_TIMEOUT, self.source.disconnect())
            .await
        {
            exit_code = 1;
        }

        self.cancellation_token.cancel();
        if let Some(handle) = self.dashboard_handle.take() {
            self.join_component("dashboard", handle, SOURCE_STOP_TIMEOUT)
                .await;
        }
        if let Some(handle) = self.activity_handle.take() {
            self.join_component("activity", handle, SOURCE_STOP_TIMEOUT)
                .await;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Run one stop future under a deadline; false if it overran
    async fn stop_component<F: Future<Output = ()>>(
        &self,
        component: &str,
        limit: Duration,
        stop: F,
    ) -> bool {
        info!("Stopping {} component", component);
        self.state
            .set_component_state(component, ComponentState::Stopping);

        match timeout(limit, stop).await {
            Ok(()) => {
                self.state
                    .set_component_state(component, ComponentState::Stopped);
                info!("{} component stopped", component);
                true
            }
            Err(_) => {
                self.state
                    .set_component_state(component, ComponentState::Failed);
                error!("{} component stop timeout", component);
                false
            }
        }
    }

    async fn join_component(
        &self,
        component: &str,
        handle: JoinHandle<()>,
        limit: Duration,
    ) -> bool {
        let abort = handle.abort_handle();
        let result = timeout(limit, handle).await;
        let stopped = match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("{} task failed: {}", component, e);
                false
            }
            Err(_) => {
                warn!("{} task did not stop in time, aborting", component);
                abort.abort();
                false
            }
        };

        let state = if stopped {
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        self.state.set_component_state(component, state);
        stopped
    }
}
