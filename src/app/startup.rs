use super::{ComponentState, FallwatchOrchestrator};
use crate::dispatch::OnlineStatus;
use crate::error::{FallwatchError, Result};
use tracing::{error, info};

impl FallwatchOrchestrator {
    /// Connect the source, announce presence and start the loops.
    ///
    /// Only a frame source that cannot be connected fails startup; sinks
    /// were already probed and degrade on their own.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting fallwatch");

        self.state
            .set_component_state("source", ComponentState::Starting);
        if let Err(e) = self.source.connect().await {
            self.state.set_component_state("source", ComponentState::Failed);
            error!("Failed to connect frame source: {}", e);
            return Err(e.into());
        }
        self.state.set_component_state("source", ComponentState::Running);

        let published = self.dispatcher.publish_status(OnlineStatus::Online).await;
        info!(published, "Online status sent");
        self.state.set_component_state("dispatch", ComponentState::Running);

        let monitor = self
            .monitor
            .take()
            .ok_or_else(|| FallwatchError::system("Detection monitor already started"))?;
        let token = self.monitor_token.clone();
        self.monitor_handle = Some(tokio::spawn(monitor.run(token)));
        self.state.set_component_state("monitor", ComponentState::Running);

        #[cfg(feature = "dashboard")]
        self.start_dashboard();

        info!("Fallwatch started");
        Ok(())
    }

    #[cfg(feature = "dashboard")]
    fn start_dashboard(&mut self) {
        use crate::dashboard::DashboardServer;
        use crate::events::FallwatchEvent;

        if !self.config.dashboard.enabled {
            return;
        }

        let server = DashboardServer::new(self.config.dashboard.clone(), self.query());
        let token = self.cancellation_token.clone();
        let state = std::sync::Arc::clone(&self.state);
        let event_bus = self.event_bus.clone();
        self.state
            .set_component_state("dashboard", ComponentState::Running);
        self.dashboard_handle = Some(tokio::spawn(async move {
            if let Err(e) = server.serve(token).await {
                error!("Dashboard server error: {}", e);
                state.set_component_state("dashboard", ComponentState::Failed);
                let _ = event_bus.publish(FallwatchEvent::SystemError {
                    component: "dashboard".to_string(),
                    error: e.to_string(),
                });
            }
        }));
        info!(
            "Dashboard listening on {}:{}",
            self.config.dashboard.ip, self.config.dashboard.port
        );
    }
}
