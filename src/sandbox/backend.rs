use std::process::Stdio;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::confine::{self, ProcessGroup};
use super::{DemoArtifact, Rendered, SandboxError, SandboxPolicy};

/// Directories a sandboxed runner may resolve programs from.
const SAFE_PATH_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

/// An execution context provider.
///
/// Each call to [`execute`](IsolationBackend::execute) must run in a fresh
/// context that shares nothing with the host or with other calls. Dropping the
/// returned future must release every resource the context holds.
pub trait IsolationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute<'a>(
        &'a self,
        artifact: &'a DemoArtifact,
        policy: &'a SandboxPolicy,
    ) -> BoxFuture<'a, Result<Rendered, SandboxError>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hand the document to a browser behind a sandbox CSP.
    #[default]
    Document,
    /// Run the demo with an external runner in a separate OS process.
    Process,
}

// ============================================================
// Document backend
// ============================================================

/// Loads the demo document for delivery to a browser.
///
/// Isolation is enforced by the browser through the policy's
/// `Content-Security-Policy: sandbox` directive, which the HTTP layer attaches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentBackend;

impl IsolationBackend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    fn execute<'a>(
        &'a self,
        artifact: &'a DemoArtifact,
        _policy: &'a SandboxPolicy,
    ) -> BoxFuture<'a, Result<Rendered, SandboxError>> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&artifact.path)
                .await
                .map_err(|source| SandboxError::Load {
                    unit: artifact.unit.clone(),
                    source,
                })?;
            Ok(Rendered {
                content_type: "text/html; charset=utf-8".to_string(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                truncated: false,
            })
        })
    }
}

// ============================================================
// Process backend
// ============================================================

/// Runs a demo in a child process.
///
/// The artifact is copied into a private temporary directory that becomes the
/// child's working directory, `HOME`, and `TMPDIR`. The child gets a cleared
/// environment with a restricted `PATH` and no stdin. On Linux it can write
/// only inside that directory and cannot open TCP connections; see
/// [`confine`](super::confine). The child and everything it forks are killed
/// when the run ends, the context is dropped, or the policy timeout passes.
/// Its stdout is the rendered output.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    runner: Vec<String>,
}

impl ProcessBackend {
    /// `runner` is the program and leading arguments; the staged artifact path
    /// is appended as the last argument.
    pub fn new(runner: Vec<String>) -> Self {
        if !confine::filesystem_confinement_available() {
            warn!(
                "Kernel filesystem confinement is unavailable; \
                 sandboxed demos can reach the host filesystem"
            );
        }
        Self { runner }
    }

    pub fn runner(&self) -> &[String] {
        &self.runner
    }

    async fn run(
        &self,
        artifact: &DemoArtifact,
        policy: &SandboxPolicy,
    ) -> Result<Rendered, SandboxError> {
        if !policy.allow_scripts {
            return Err(SandboxError::ScriptsDenied);
        }
        let (program, args) = self.runner.split_first().ok_or(SandboxError::NoRunner)?;

        // Removed on drop, which covers success, failure, and cancellation.
        let context = tempfile::Builder::new()
            .prefix("velvron-sandbox-")
            .tempdir()
            .map_err(SandboxError::Context)?;

        let file_name = artifact
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "demo".into());
        let staged = context.path().join(file_name);
        tokio::fs::copy(&artifact.path, &staged)
            .await
            .map_err(|source| SandboxError::Load {
                unit: artifact.unit.clone(),
                source,
            })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&staged)
            .current_dir(context.path())
            .env_clear()
            .env("PATH", SAFE_PATH_DIRS.join(":"))
            .env("HOME", context.path())
            .env("TMPDIR", context.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        confine::confine(&mut cmd, context.path(), program, policy.limits);

        debug!(unit = %artifact.unit, program = %program, "Starting sandboxed demo");

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.clone(),
            source,
        })?;
        // Declared after `context` so the group is killed before the
        // directory is removed.
        let group = ProcessGroup::of(&child);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = policy.max_output_bytes;

        let finished = timeout(policy.timeout, async {
            let exited = async {
                let status = child.wait().await;
                // Background processes left behind would hold the pipes open.
                group.kill();
                status
            };
            tokio::try_join!(
                read_bounded(stdout, limit),
                read_bounded(stderr, limit),
                exited,
            )
        })
        .await;

        let ((out, truncated), (err, _), status) = match finished {
            Ok(result) => result.map_err(SandboxError::Execution)?,
            Err(_) => {
                let _ = child.start_kill();
                group.kill();
                return Err(SandboxError::TimedOut(policy.timeout));
            }
        };

        if !status.success() {
            return Err(SandboxError::Exited {
                code: status.code(),
                stderr: String::from_utf8_lossy(&err).trim().to_string(),
            });
        }

        Ok(Rendered {
            content_type: "text/plain; charset=utf-8".to_string(),
            body: String::from_utf8_lossy(&out).into_owned(),
            truncated,
        })
    }
}

impl IsolationBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn execute<'a>(
        &'a self,
        artifact: &'a DemoArtifact,
        policy: &'a SandboxPolicy,
    ) -> BoxFuture<'a, Result<Rendered, SandboxError>> {
        Box::pin(self.run(artifact, policy))
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
///
/// The rest is drained and discarded so the writer never blocks on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((kept, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_bounded_keeps_prefix_and_flags_truncation() {
        let data: &[u8] = b"hello sandbox";
        let (kept, truncated) = read_bounded(Some(data), 5).await.unwrap();
        assert_eq!(kept, b"hello");
        assert!(truncated);

        let (kept, truncated) = read_bounded(Some(data), 64).await.unwrap();
        assert_eq!(kept, data);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn process_backend_without_runner_fails() {
        let backend = ProcessBackend::new(vec![]);
        let artifact = DemoArtifact {
            unit: "Card".parse().unwrap(),
            path: "/nonexistent/Card/index.html".into(),
        };
        let err = backend
            .execute(&artifact, &SandboxPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NoRunner));
    }
}
