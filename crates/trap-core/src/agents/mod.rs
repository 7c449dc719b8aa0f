//! Agent lifecycle manager.
//!
//! Tracks live agent handles in a process-local map, spawns agents
//! through the gateway, and reaps handles whose session rows have gone
//! terminal. The map is deliberately not persisted: the sessions table
//! is the ground truth, and ghost detection in the cleanup phase
//! reconstructs anything a restart forgot.

pub mod models;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use trap_db::models::{Role, SessionStatus};
use trap_db::store::{Store, StoreError};

use crate::rpc::{ChatSendRequest, ChatSendStatus, Gateway, RpcError};

/// Session key for a work-loop agent: `workloop:<role>:<task_id>`.
pub fn session_key(role: Role, task_id: Uuid) -> String {
    format!("workloop:{role}:{task_id}")
}

/// An in-memory record of a spawned agent. Lost on restart by design.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub role: Role,
    pub session_key: String,
    /// `runId` returned by `chat.send`; persisted on the task as
    /// `session_id`.
    pub run_id: String,
    pub model: String,
    pub spawned_at: Instant,
    pub last_activity_at: Instant,
}

/// A handle removed by [`AgentManager::reap`] together with the terminal
/// session status that retired it.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub handle: AgentHandle,
    pub session_status: SessionStatus,
}

/// Errors from [`AgentManager::spawn`].
#[derive(Debug, Error)]
pub enum SpawnError {
    /// A live handle already exists for this task.
    #[error("task {0} already has a live agent")]
    AlreadyRunning(Uuid),

    /// The gateway accepted the request but reported `status: "error"`.
    #[error("gateway rejected spawn for session {session_key}")]
    Rejected { session_key: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub role: Role,
    pub message: String,
    pub model: String,
    pub thinking: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Default)]
struct Inner {
    handles: HashMap<Uuid, AgentHandle>,
    /// `(task, role)` pairs reaped within the cooldown window.
    recently_reaped: HashMap<(Uuid, Role), Instant>,
}

/// The process-local agent registry.
pub struct AgentManager {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn Store>,
    reap_cooldown: Duration,
    inner: Mutex<Inner>,
}

impl AgentManager {
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<dyn Store>, reap_cooldown: Duration) -> Self {
        Self {
            gateway,
            store,
            reap_cooldown,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Launch an agent for a task. Rejected when a live handle for the
    /// task already exists.
    pub async fn spawn(&self, spec: SpawnSpec) -> Result<AgentHandle, SpawnError> {
        if self.has(spec.task_id) {
            return Err(SpawnError::AlreadyRunning(spec.task_id));
        }

        let key = session_key(spec.role, spec.task_id);
        let request = ChatSendRequest {
            session_key: key.clone(),
            message: spec.message.clone(),
            model: Some(spec.model.clone()),
            thinking: spec.thinking.clone(),
            timeout_seconds: Some(spec.timeout_seconds),
            idempotency_key: Uuid::new_v4().to_string(),
        };

        let response = self.gateway.chat_send(&request).await?;
        if response.status == ChatSendStatus::Error {
            return Err(SpawnError::Rejected { session_key: key });
        }

        let now = Instant::now();
        let handle = AgentHandle {
            task_id: spec.task_id,
            project_id: spec.project_id,
            role: spec.role,
            session_key: key.clone(),
            run_id: response.run_id,
            model: spec.model,
            spawned_at: now,
            last_activity_at: now,
        };

        tracing::info!(
            task_id = %spec.task_id,
            project_id = %spec.project_id,
            role = %spec.role,
            session_key = %key,
            "spawned agent"
        );

        self.lock().handles.insert(spec.task_id, handle.clone());
        Ok(handle)
    }

    pub fn has(&self, task_id: Uuid) -> bool {
        self.lock().handles.contains_key(&task_id)
    }

    pub fn get(&self, task_id: Uuid) -> Option<AgentHandle> {
        self.lock().handles.get(&task_id).cloned()
    }

    pub fn active(&self) -> Vec<AgentHandle> {
        self.lock().handles.values().cloned().collect()
    }

    /// Number of live handles matching the optional filters.
    pub fn active_count(&self, project_id: Option<Uuid>, role: Option<Role>) -> usize {
        self.lock()
            .handles
            .values()
            .filter(|h| project_id.is_none_or(|p| h.project_id == p))
            .filter(|h| role.is_none_or(|r| h.role == r))
            .count()
    }

    /// Whether a `(task, role)` pair was reaped within the cooldown
    /// window. Prevents respawning the same role on the same task the
    /// cycle after its session ended.
    pub fn is_recently_reaped(&self, task_id: Uuid, role: Role) -> bool {
        let inner = self.lock();
        inner
            .recently_reaped
            .get(&(task_id, role))
            .is_some_and(|at| at.elapsed() < self.reap_cooldown)
    }

    /// Retire handles whose session rows have gone terminal.
    ///
    /// A handle with no session row yet is considered still spawning and
    /// is left alone. Returns the retired handles; calling again with no
    /// session changes returns an empty list.
    pub async fn reap(&self) -> Result<Vec<Reaped>, StoreError> {
        let snapshot = self.active();
        let mut reaped = Vec::new();

        for handle in snapshot {
            let Some(session) = self.store.get_session(&handle.session_key).await? else {
                continue;
            };
            if session.status.is_terminal() {
                reaped.push(Reaped {
                    handle,
                    session_status: session.status,
                });
            }
        }

        let now = Instant::now();
        {
            let mut inner = self.lock();
            for r in &reaped {
                inner.handles.remove(&r.handle.task_id);
                inner
                    .recently_reaped
                    .insert((r.handle.task_id, r.handle.role), now);
            }
            // Drop cooldown entries that have aged out.
            let cooldown = self.reap_cooldown;
            inner
                .recently_reaped
                .retain(|_, at| at.elapsed() < cooldown);
        }

        for r in &reaped {
            tracing::info!(
                task_id = %r.handle.task_id,
                session_key = %r.handle.session_key,
                session_status = %r.session_status,
                "reaped agent handle"
            );
        }

        Ok(reaped)
    }

    /// Send `chat.abort` for one task's session. The handle stays; reap
    /// removes it once the session row flips to a terminal status.
    pub async fn kill(&self, task_id: Uuid) -> Result<(), RpcError> {
        let Some(handle) = self.get(task_id) else {
            return Ok(());
        };
        self.gateway.chat_abort(&handle.session_key).await
    }

    /// Abort every tracked session. Individual failures are logged and
    /// skipped; handles are never removed here.
    pub async fn kill_all(&self) {
        for handle in self.active() {
            if let Err(e) = self.gateway.chat_abort(&handle.session_key).await {
                tracing::warn!(
                    session_key = %handle.session_key,
                    error = %e,
                    "failed to abort session during shutdown"
                );
            }
        }
    }
}
