//! Where the aggregator reads the index and per-unit manifests from.
//!
//! - [`DirectorySource`] reads a content root on the local filesystem.
//! - [`HttpSource`] fetches the same layout from a running catalog server
//!   (`/components-list.json`, `/library/<id>/<manifest file>`).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::models::UnitId;
use crate::scanner::DEFAULT_MANIFEST_FILE;

/// Default per-request timeout for remote fetches.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single fetch that did not produce bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("invalid base URL {0}")]
    InvalidUrl(String),
}

/// Raw access to the index and manifests. Parsing happens in the aggregator.
pub trait ManifestSource: Send + Sync {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    fn fetch_index(&self) -> BoxFuture<'_, Result<Vec<u8>, FetchError>>;

    fn fetch_manifest<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

impl<S: ManifestSource + ?Sized> ManifestSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn fetch_index(&self) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        (**self).fetch_index()
    }

    fn fetch_manifest<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        (**self).fetch_manifest(unit)
    }
}

// ============================================================
// Local filesystem
// ============================================================

#[derive(Debug, Clone)]
pub struct DirectorySource {
    index_path: PathBuf,
    content_root: PathBuf,
    manifest_file: String,
}

impl DirectorySource {
    pub fn new(index_path: impl Into<PathBuf>, content_root: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            content_root: content_root.into(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }

    pub fn with_manifest_file(mut self, manifest_file: impl Into<String>) -> Self {
        self.manifest_file = manifest_file.into();
        self
    }

    async fn read(path: PathBuf) -> Result<Vec<u8>, FetchError> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(source) => Err(FetchError::Io { path, source }),
        }
    }
}

impl ManifestSource for DirectorySource {
    fn describe(&self) -> String {
        self.index_path.display().to_string()
    }

    fn fetch_index(&self) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        Box::pin(Self::read(self.index_path.clone()))
    }

    fn fetch_manifest<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        // `unit` is a validated single path segment.
        let path = self
            .content_root
            .join(unit.as_str())
            .join(&self.manifest_file);
        Box::pin(Self::read(path))
    }
}

// ============================================================
// Remote catalog server
// ============================================================

/// Fetches `<base>/components-list.json` and
/// `<base>/library/<id>/<manifest_file>`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    manifest_file: String,
    timeout: Duration,
    client: Client,
}

impl HttpSource {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            client: Client::new(),
        }
    }

    pub fn with_manifest_file(mut self, manifest_file: impl Into<String>) -> Self {
        self.manifest_file = manifest_file.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build `<base>/<segments...>`, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let invalid = || FetchError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str]) -> Result<Vec<u8>, FetchError> {
        let url = self.url(segments)?;
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(url.to_string())),
            status => Err(FetchError::Status {
                status,
                url: url.to_string(),
            }),
        }
    }
}

impl ManifestSource for HttpSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn fetch_index(&self) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        Box::pin(self.get(&["components-list.json"]))
    }

    fn fetch_manifest<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            self.get(&["library", unit.as_str(), &self.manifest_file])
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_urls_encode_the_unit_segment() {
        let source = HttpSource::new("http://localhost:3000/catalog/");
        let url = source.url(&["library", "Card 3D", "manifest.json"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/catalog/library/Card%203D/manifest.json"
        );
    }

    #[test]
    fn http_source_trims_trailing_slash() {
        let source = HttpSource::new("http://localhost:3000/");
        assert_eq!(source.describe(), "http://localhost:3000");
    }
}
