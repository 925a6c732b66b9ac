//! Byte fetch primitive for frame resources.
//!
//! `http://` and `https://` URIs go through reqwest. Everything else is read
//! from the filesystem with tokio's async file I/O; `file://` prefixes are
//! stripped and relative paths resolve against the configured base directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::config::FetchConfig;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request for {uri} returned status {status}")]
    Status { uri: String, status: u16 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
}

/// Fire-and-forget async fetch of a frame resource.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_bytes(&self, uri: &str) -> Result<Bytes, FetchError>;
}

/// Filesystem + HTTP fetcher.
pub struct ResourceFetcher {
    client: reqwest::Client,
    base_dir: Option<PathBuf>,
}

impl ResourceFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_dir: config.base_dir.clone(),
        })
    }

    /// Filesystem path for a non-HTTP URI.
    fn resolve_path(&self, uri: &str) -> Result<PathBuf, FetchError> {
        let raw = match uri.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => return Err(FetchError::UnsupportedScheme(scheme.to_string())),
            None => uri,
        };

        let path = Path::new(raw);
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        })
    }

    async fn fetch_http(&self, uri: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn fetch_file(&self, uri: &str) -> Result<Bytes, FetchError> {
        let path = self.resolve_path(uri)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(source) => Err(FetchError::Io { path, source }),
        }
    }
}

#[async_trait]
impl Fetcher for ResourceFetcher {
    async fn fetch_bytes(&self, uri: &str) -> Result<Bytes, FetchError> {
        let bytes = if uri.starts_with("http://") || uri.starts_with("https://") {
            self.fetch_http(uri).await?
        } else {
            self.fetch_file(uri).await?
        };
        debug!(uri, size = bytes.len(), "Fetched resource");
        Ok(bytes)
    }
}

/// In-memory fetcher keyed by URI. Missing URIs fail with `NotFound`.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    resources: Arc<Mutex<HashMap<String, Bytes>>>,
    requests: Arc<AtomicU64>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, bytes: impl Into<Bytes>) {
        if let Ok(mut resources) = self.resources.lock() {
            resources.insert(uri.into(), bytes.into());
        }
    }

    pub fn remove(&self, uri: &str) {
        if let Ok(mut resources) = self.resources.lock() {
            resources.remove(uri);
        }
    }

    /// Total `fetch_bytes` calls, successful or not.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch_bytes(&self, uri: &str) -> Result<Bytes, FetchError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let found = self
            .resources
            .lock()
            .ok()
            .and_then(|resources| resources.get(uri).cloned());
        found.ok_or_else(|| FetchError::NotFound(uri.to_string()))
    }
}
