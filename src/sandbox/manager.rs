use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ArtifactRegistry, IsolationBackend, Rendered, SandboxError, SandboxPolicy, SandboxState,
};
use crate::models::UnitId;

/// Sandboxes [`SandboxManager::open`] keeps at once unless configured.
pub const DEFAULT_MAX_OPEN: usize = 32;

/// Snapshot of one mounted sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub id: Uuid,
    pub unit: UnitId,
    #[serde(flatten)]
    pub state: SandboxState,
}

/// One mounted sandbox. Owns its execution context.
///
/// Dropping the handle aborts the context; [`unmount`](Self::unmount) also
/// waits until the context is gone.
#[derive(Debug)]
pub struct SandboxHandle {
    id: Uuid,
    unit: UnitId,
    mounted_at: Instant,
    state: watch::Receiver<SandboxState>,
    task: Option<JoinHandle<()>>,
}

impl SandboxHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn state(&self) -> SandboxState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SandboxStatus {
        SandboxStatus {
            id: self.id,
            unit: self.unit.clone(),
            state: self.state(),
        }
    }

    /// Wait for `Ready` or `Error`.
    pub async fn settled(&mut self) -> SandboxState {
        let settled = self
            .state
            .wait_for(SandboxState::is_terminal)
            .await
            .map(|state| state.clone());
        // The context went away without settling; report what was last seen.
        settled.unwrap_or_else(|_| self.state())
    }

    /// Tear down the execution context, whatever state it is in.
    pub async fn unmount(mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Joining guarantees the context future, and everything it owns,
            // has been dropped.
            let _ = task.await;
            debug!(sandbox = %self.id, unit = %self.unit, "Sandbox unmounted");
        }
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ManagerInner {
    registry: ArtifactRegistry,
    backend: Arc<dyn IsolationBackend>,
    policy: SandboxPolicy,
    open: Mutex<HashMap<Uuid, SandboxHandle>>,
}

/// Mounts sandboxes for catalog units.
///
/// Handles from [`mount`](Self::mount) belong to the caller. Sandboxes opened
/// with [`open`](Self::open) are tracked by id until [`close`](Self::close),
/// for callers that cannot hold a handle (HTTP clients). At most `max_open`
/// are tracked; when full, the oldest settled one is dropped to make room.
#[derive(Clone)]
pub struct SandboxManager {
    inner: Arc<ManagerInner>,
    max_open: usize,
}

impl SandboxManager {
    pub fn new(
        registry: ArtifactRegistry,
        backend: Arc<dyn IsolationBackend>,
        policy: SandboxPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                backend,
                policy,
                open: Mutex::new(HashMap::new()),
            }),
            max_open: DEFAULT_MAX_OPEN,
        }
    }

    /// Zero is treated as one.
    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.inner.policy
    }

    /// Start a fresh execution context for `unit`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&self, unit: &str) -> Result<SandboxHandle, SandboxError> {
        let artifact = self.inner.registry.resolve(unit)?.clone();
        let unit = artifact.unit.clone();
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(SandboxState::Idle);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            tx.send_replace(SandboxState::Loading);

            let run = inner.backend.execute(&artifact, &inner.policy);
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err(SandboxError::Panicked),
            };

            let next = match outcome {
                Ok(output) => SandboxState::Ready { output },
                Err(e) => {
                    warn!(sandbox = %id, unit = %artifact.unit, error = %e, "Sandbox failed to load");
                    SandboxState::Error {
                        message: e.to_string(),
                    }
                }
            };
            tx.send_replace(next);
        });

        debug!(sandbox = %id, unit = %unit, backend = self.backend_name(), "Sandbox mounted");

        Ok(SandboxHandle {
            id,
            unit,
            mounted_at: Instant::now(),
            state: rx,
            task: Some(task),
        })
    }

    /// Mount, wait for the demo to settle, and unmount.
    pub async fn render(&self, unit: &str) -> Result<Rendered, SandboxError> {
        let mut handle = self.mount(unit)?;
        let state = handle.settled().await;
        handle.unmount().await;
        match state {
            SandboxState::Ready { output } => Ok(output),
            SandboxState::Error { message } => Err(SandboxError::Failed(message)),
            SandboxState::Idle | SandboxState::Loading => Err(SandboxError::Failed(
                "sandbox was torn down before it settled".to_string(),
            )),
        }
    }

    /// Mount `unit` and keep it open under its id.
    ///
    /// Fails with [`SandboxError::Capacity`] when `max_open` sandboxes are
    /// open and none of them has settled.
    pub fn open(&self, unit: &str) -> Result<SandboxStatus, SandboxError> {
        // Unknown units must not evict anything.
        self.inner.registry.resolve(unit)?;

        let mut open = self.open_sandboxes();
        if open.len() >= self.max_open {
            let oldest_settled = open
                .values()
                .filter(|handle| handle.state.borrow().is_terminal())
                .min_by_key(|handle| handle.mounted_at)
                .map(SandboxHandle::id);
            match oldest_settled {
                Some(id) => {
                    // Settled, so its task has finished and dropping is enough.
                    open.remove(&id);
                    debug!(sandbox = %id, "Evicted settled sandbox");
                }
                None => return Err(SandboxError::Capacity(self.max_open)),
            }
        }

        let handle = self.mount(unit)?;
        let status = handle.status();
        open.insert(handle.id(), handle);
        Ok(status)
    }

    pub fn status(&self, id: Uuid) -> Option<SandboxStatus> {
        self.open_sandboxes().get(&id).map(SandboxHandle::status)
    }

    /// Unmount an open sandbox. Returns `false` if no sandbox has that id.
    pub async fn close(&self, id: Uuid) -> bool {
        // Take the handle out before awaiting; the lock is never held across
        // the teardown.
        let handle = self.open_sandboxes().remove(&id);
        match handle {
            Some(handle) => {
                handle.unmount().await;
                true
            }
            None => false,
        }
    }

    /// Unmount every open sandbox.
    pub async fn close_all(&self) {
        let handles: Vec<SandboxHandle> = self.open_sandboxes().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.unmount().await;
        }
    }

    /// Number of sandboxes opened with [`open`](Self::open) and not yet closed.
    pub fn live_count(&self) -> usize {
        self.open_sandboxes().len()
    }

    fn open_sandboxes(&self) -> MutexGuard<'_, HashMap<Uuid, SandboxHandle>> {
        // A poisoned map still holds valid handles.
        self.inner
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
