use super::{FallwatchOrchestrator, ShutdownReason};
use crate::error::{FallwatchError, Result};
use crate::events::FallwatchEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::oneshot;
use tracing::{info, warn};

type SharedSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl FallwatchOrchestrator {
    /// Wait for SIGINT/SIGTERM (or a shutdown handle), then shut down in order
    pub async fn run(&mut self) -> Result<i32> {
        info!("Fallwatch is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| FallwatchError::system("Shutdown receiver already taken"))?;

        if let Some(sender) = self.shutdown_sender.take() {
            setup_signal_handlers(Arc::new(Mutex::new(Some(sender))));
        }

        let reason = shutdown_receiver
            .await
            .map_err(|_| FallwatchError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {}", reason);
        let _ = self.event_bus.publish(FallwatchEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: reason.to_string(),
        });

        let exit_code = self.shutdown().await?;
        info!("Fallwatch shutdown complete");
        Ok(exit_code)
    }
}

fn signal_shutdown(sender: &SharedSender, name: &str) {
    info!("Received {} signal", name);
    if let Some(sender) = sender.lock().take() {
        let _ = sender.send(ShutdownReason::Signal(name.to_string()));
    }
}

fn setup_signal_handlers(sender: SharedSender) {
    #[cfg(unix)]
    {
        let sender = Arc::clone(&sender);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        signal_shutdown(&sender, "SIGTERM");
                    }
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_shutdown(&sender, "SIGINT"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}
