//! Isolated rendering of a unit's demo artifact.
//!
//! A unit's demo is third-party code. It runs behind an [`IsolationBackend`]
//! under a [`SandboxPolicy`]: scripts may run, but the host environment,
//! working directory, and storage are out of reach, and runtime and output are
//! bounded.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──► Loading ──► Ready
//!                 └──► Error
//! ```
//!
//! `Ready` and `Error` are terminal. Unmounting is possible from any state and
//! tears the execution context down: the task is aborted and joined, the
//! demo's process group is killed, and the private working directory is
//! removed.
//!
//! Artifacts are resolved through an [`ArtifactRegistry`] built from the
//! catalog, never from a path assembled out of the caller's input.

mod backend;
mod confine;
mod manager;
mod registry;

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UnitId;

pub use backend::{BackendKind, DocumentBackend, IsolationBackend, ProcessBackend};
pub use confine::{filesystem_confinement_available, ResourceLimits};
pub use manager::{SandboxHandle, SandboxManager, SandboxStatus, DEFAULT_MAX_OPEN};
pub use registry::{ArtifactRegistry, DemoArtifact, DEFAULT_DEMO_FILE};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// What a sandboxed demo is allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    /// Demo code may execute. A backend refuses to run anything otherwise.
    pub allow_scripts: bool,
    /// Wall-clock budget for loading and running the demo.
    pub timeout: Duration,
    /// Captured output beyond this many bytes is discarded.
    pub max_output_bytes: usize,
    /// OS limits for process-backed demos.
    pub limits: ResourceLimits,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_scripts: true,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            limits: ResourceLimits::default(),
        }
    }
}

impl SandboxPolicy {
    /// `Content-Security-Policy` value for serving a demo document to a
    /// browser. Without `allow-same-origin` the document gets an opaque
    /// origin: no access to host cookies, storage, or DOM.
    pub fn content_security_policy(&self) -> String {
        if self.allow_scripts {
            "sandbox allow-scripts".to_string()
        } else {
            "sandbox".to_string()
        }
    }
}

/// Output of a demo that loaded successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendered {
    pub content_type: String,
    pub body: String,
    /// Output was cut at the policy's byte limit.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SandboxState {
    Idle,
    Loading,
    Ready { output: Rendered },
    Error { message: String },
}

impl SandboxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Error { .. })
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("component `{0}` not found")]
    NotFound(String),

    #[error("demo for `{unit}` could not be loaded: {source}")]
    Load {
        unit: UnitId,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare sandbox context: {0}")]
    Context(#[source] io::Error),

    #[error("no sandbox runner configured")]
    NoRunner,

    #[error("script execution is denied by the sandbox policy")]
    ScriptsDenied,

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("demo failed while running: {0}")]
    Execution(#[source] io::Error),

    #[error("demo exited with status {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("demo did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("demo panicked inside the sandbox")]
    Panicked,

    #[error("too many open sandboxes (limit {0})")]
    Capacity(usize),

    #[error("{0}")]
    Failed(String),
}
