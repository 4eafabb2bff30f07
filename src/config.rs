//! Catalog configuration.
//!
//! Resolution order: built-in defaults, then a JSON config file, then
//! `VELVRON_*` environment variables. Command-line flags are applied last by
//! the binary.
//!
//! The default config file lives in the platform config directory
//! (`~/.config/velvron/config.json` on Linux). A missing file is not an error.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::aggregator::{
    Aggregator, DirectorySource, HttpSource, ManifestSource, DEFAULT_FETCH_CONCURRENCY,
};
use crate::catalog::DEFAULT_PAGE_SIZE;
use crate::sandbox::{
    BackendKind, DocumentBackend, IsolationBackend, ProcessBackend, ResourceLimits,
    SandboxPolicy, DEFAULT_DEMO_FILE, DEFAULT_MAX_OPEN, DEFAULT_MAX_OUTPUT_BYTES,
};
use crate::scanner::{ScanOptions, DEFAULT_MANIFEST_FILE};

const APP_NAME: &str = "velvron";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding one subdirectory per unit.
    pub content_root: PathBuf,
    /// Where the scanner writes, and the aggregator reads, the index.
    pub index_path: PathBuf,
    pub manifest_file: String,
    pub demo_file: String,
    pub page_size: usize,
    pub max_page_size: usize,
    pub fetch_concurrency: usize,
    /// Per-request timeout when aggregating from `source_url`.
    pub fetch_timeout_secs: u64,
    /// Aggregate from a remote catalog server instead of `content_root`.
    pub source_url: Option<String>,
    pub sandbox: SandboxConfig,
    pub server: ServerConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("public/library"),
            index_path: PathBuf::from("public/components-list.json"),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            demo_file: DEFAULT_DEMO_FILE.to_string(),
            page_size: DEFAULT_PAGE_SIZE.get(),
            max_page_size: 100,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fetch_timeout_secs: 10,
            source_url: None,
            sandbox: SandboxConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: BackendKind,
    /// Program and leading arguments for the process backend.
    pub runner: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Sandboxes kept open through the HTTP API at once.
    pub max_open: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            runner: Vec::new(),
            timeout_secs: 10,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_open: DEFAULT_MAX_OPEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: None,
        }
    }
}

impl CatalogConfig {
    /// Load configuration, then apply environment overrides.
    ///
    /// An explicit `path` must exist and parse. Without one, the default
    /// location is tried and a broken file there only produces a warning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path).unwrap_or_else(|e| {
                    warn!("Failed to load config, using defaults: {}", e);
                    Self::default()
                }),
                _ => Self::default(),
            },
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
        Some(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Apply `VELVRON_*` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup("VELVRON_CONTENT_ROOT") {
            self.content_root = PathBuf::from(root);
        }
        if let Some(index) = lookup("VELVRON_INDEX_PATH") {
            self.index_path = PathBuf::from(index);
        }
        if let Some(url) = lookup("VELVRON_SOURCE_URL") {
            self.source_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(port) = lookup("VELVRON_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "VELVRON_PORT",
                value: port,
            })?;
        }
        if let Some(origins) = lookup("VELVRON_CORS_ORIGINS") {
            self.server.cors_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        Ok(())
    }

    /// Default page size; a configured 0 falls back to the gallery default.
    pub fn page_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.page_size).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn max_page_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .max(self.page_size())
    }

    pub fn scan_options(&self, strict: bool) -> ScanOptions {
        ScanOptions {
            manifest_file: self.manifest_file.clone(),
            strict,
        }
    }

    /// The manifest source this configuration points at.
    pub fn manifest_source(&self) -> Box<dyn ManifestSource> {
        match &self.source_url {
            Some(url) => Box::new(
                HttpSource::new(url.clone())
                    .with_manifest_file(self.manifest_file.clone())
                    .with_timeout(Duration::from_secs(self.fetch_timeout_secs.max(1))),
            ),
            None => Box::new(
                DirectorySource::new(&self.index_path, &self.content_root)
                    .with_manifest_file(self.manifest_file.clone()),
            ),
        }
    }

    pub fn aggregator(&self) -> Aggregator<Box<dyn ManifestSource>> {
        Aggregator::new(self.manifest_source()).with_concurrency(self.fetch_concurrency)
    }

    pub fn sandbox_policy(&self) -> SandboxPolicy {
        SandboxPolicy {
            allow_scripts: true,
            timeout: Duration::from_secs(self.sandbox.timeout_secs.max(1)),
            max_output_bytes: self.sandbox.max_output_bytes,
            limits: ResourceLimits::default(),
        }
    }

    pub fn sandbox_backend(&self) -> Arc<dyn IsolationBackend> {
        match self.sandbox.backend {
            BackendKind::Document => Arc::new(DocumentBackend),
            BackendKind::Process => Arc::new(ProcessBackend::new(self.sandbox.runner.clone())),
        }
    }
}
