use crate::config::{StorageBackend, StorageSinkConfig};
use crate::dispatch::sink::ClipStore;
use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SINK: &str = "storage";

fn file_name(local_path: &Path) -> Result<String, SinkError> {
    local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SinkError::delivery(SINK, format!("{} has no file name", local_path.display())))
}

fn io_error(source: std::io::Error) -> SinkError {
    SinkError::Io {
        sink: SINK.to_string(),
        source,
    }
}

/// Build the configured store; fails when its backend cannot be set up
pub fn build_clip_store(
    config: &StorageSinkConfig,
    upload_timeout: Duration,
) -> Result<Arc<dyn ClipStore>, SinkError> {
    match config.backend {
        StorageBackend::Directory => Ok(Arc::new(DirectoryClipStore::new(
            &config.directory,
            &config.prefix,
        )?)),
        StorageBackend::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| SinkError::configuration(SINK, "http backend needs an endpoint"))?;
            Ok(Arc::new(HttpClipStore::new(
                endpoint,
                config.bearer_token.clone(),
                &config.prefix,
                upload_timeout,
            )?))
        }
    }
}

/// Copies clips into a local (possibly network-mounted) directory tree
#[derive(Debug)]
pub struct DirectoryClipStore {
    root: PathBuf,
    prefix: String,
}

impl DirectoryClipStore {
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Result<Self, SinkError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_error)?;
        Ok(Self {
            root,
            prefix: prefix.to_string(),
        })
    }
}

#[async_trait]
impl ClipStore for DirectoryClipStore {
    fn name(&self) -> &str {
        "directory"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, SinkError> {
        let key = format!("{}{}", self.prefix, file_name(local_path)?);
        let target = self.root.join(&key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        tokio::fs::copy(local_path, &target).await.map_err(io_error)?;

        let absolute = tokio::fs::canonicalize(&target).await.unwrap_or(target);
        let url = format!("file://{}", absolute.display());
        info!(sink = SINK, %url, "Clip stored");
        Ok(url)
    }
}

/// PUTs clips to `<endpoint>/<prefix><file name>`
#[derive(Debug)]
pub struct HttpClipStore {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
    prefix: String,
}

impl HttpClipStore {
    pub fn new(
        endpoint: String,
        bearer_token: Option<String>,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        reqwest::Url::parse(&endpoint)
            .map_err(|e| SinkError::configuration(SINK, format!("invalid endpoint: {}", e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fallwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| SinkError::Http {
                sink: SINK.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bearer_token,
            prefix: prefix.to_string(),
        })
    }

    fn object_url(&self, file_name: &str) -> String {
        format!("{}/{}{}", self.endpoint, self.prefix, file_name)
    }
}

#[async_trait]
impl ClipStore for HttpClipStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, SinkError> {
        let url = self.object_url(&file_name(local_path)?);
        let body = tokio::fs::read(local_path).await.map_err(io_error)?;

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let http_error = |source| SinkError::Http {
            sink: SINK.to_string(),
            source,
        };
        request
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?;

        info!(sink = SINK, %url, "Clip uploaded");
        Ok(url)
    }
}
