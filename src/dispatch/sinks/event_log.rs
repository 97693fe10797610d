use crate::dispatch::event::{FallEvent, FallEventMessage};
use crate::dispatch::sink::{EventSink, SinkKind};
use crate::error::SinkError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One line of the event log
#[derive(Debug, Serialize)]
struct EventLogRecord {
    event_id: Uuid,
    #[serde(flatten)]
    message: FallEventMessage,
}

/// Append-only JSON-lines record of every fall
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

fn io_error(source: std::io::Error) -> SinkError {
    SinkError::Io {
        sink: SinkKind::EventLog.as_str().to_string(),
        source,
    }
}

impl JsonlEventLog {
    /// Open (or create) the log, creating parent directories as needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for JsonlEventLog {
    fn kind(&self) -> SinkKind {
        SinkKind::EventLog
    }

    async fn deliver(&self, event: &FallEvent) -> Result<(), SinkError> {
        let record = EventLogRecord {
            event_id: event.id(),
            message: event.message(),
        };
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| SinkError::delivery(self.name(), e.to_string()))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        Ok(())
    }

    async fn close(&self) {
        let _ = self.file.lock().await.sync_all().await;
    }
}
