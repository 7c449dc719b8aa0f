//! The abstract store contract the supervisor core is written against.
//!
//! Every backend provides typed point reads, the index scans the core
//! needs, inserts with caller-supplied UUIDs, targeted partial updates,
//! deletes, and one transactional read-verify-write: the task claim.
//! The trait is object-safe so the core can hold an `Arc<dyn Store>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuthorType, Comment, CommentType, Notification, NotificationSeverity, NotificationType,
    Priority, Project, PromptVersion, Resolution, Role, SessionRow, Signal, SignalKind,
    SignalSeverity, Task, TaskEvent, TaskEventType, TaskStatus,
};

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// Optimistic-lock failure: the row's status did not match the
    /// expected value (e.g. another claimant won the task).
    #[error("task {task_id}: expected status {expected}, found {found}")]
    Conflict {
        task_id: Uuid,
        expected: TaskStatus,
        found: TaskStatus,
    },

    /// A claim or backlog exit was attempted while dependencies are open.
    #[error("task {task_id} has {unmet} dependencies not yet done")]
    DependencyUnmet { task_id: Uuid, unmet: usize },

    /// Adding this edge would make the dependency graph cyclic.
    #[error("edge {task_id} -> {depends_on_id} would create a dependency cycle")]
    DependencyCycle { task_id: Uuid, depends_on_id: Uuid },

    #[error("a task may not depend on itself")]
    SelfDependency,

    /// A second `respond` on an already-answered signal.
    #[error("signal {0} already has a response")]
    AlreadyResponded(Uuid),

    /// The backend cannot be reached; fatal for the current cycle.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Insert payloads
// ---------------------------------------------------------------------------

/// Payload for inserting a task. The id is supplied by the caller.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub role: Option<Role>,
    pub assignee: Option<String>,
    pub requires_human_review: bool,
    pub tags: Option<Vec<String>>,
}

impl NewTask {
    /// A backlog task with medium priority and no role.
    pub fn new(id: Uuid, project_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            title: title.into(),
            description: None,
            status: TaskStatus::Backlog,
            priority: Priority::Medium,
            role: None,
            assignee: None,
            requires_human_review: false,
            tags: None,
        }
    }
}

/// Payload for inserting a comment.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author: String,
    pub author_type: AuthorType,
    pub content: String,
    pub kind: CommentType,
}

impl NewComment {
    /// A `status_change` comment authored by the coordinator process.
    pub fn system(task_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            author: "work-loop".to_owned(),
            author_type: AuthorType::Coordinator,
            content: content.into(),
            kind: CommentType::StatusChange,
        }
    }
}

/// Payload for inserting a signal. `blocking` is derived from the kind.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub id: Uuid,
    pub task_id: Uuid,
    pub session_key: String,
    pub agent_id: String,
    pub kind: SignalKind,
    pub severity: SignalSeverity,
    pub message: String,
}

/// Payload for inserting a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub kind: NotificationType,
    pub severity: NotificationSeverity,
    pub title: String,
    pub message: String,
    pub agent: Option<String>,
}

/// Payload for appending an audit event.
#[derive(Debug, Clone)]
pub struct NewTaskEvent {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub event_type: TaskEventType,
    pub actor: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl NewTaskEvent {
    pub fn new(task_id: Uuid, project_id: Uuid, event_type: TaskEventType) -> Self {
        Self {
            task_id,
            project_id,
            event_type,
            actor: None,
            data: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Schema-per-type payload builders for `task_events.data`.
pub mod event_data {
    use serde_json::{Value, json};
    use uuid::Uuid;

    use crate::models::{Role, SessionStatus, TaskStatus};

    pub fn status_changed(from: TaskStatus, to: TaskStatus) -> Value {
        json!({ "from": from.as_str(), "to": to.as_str() })
    }

    pub fn agent_assigned(role: Role, session_key: &str, model: &str) -> Value {
        json!({ "role": role.as_str(), "sessionKey": session_key, "model": model })
    }

    pub fn agent_reaped(role: Role, session_key: &str, session_status: SessionStatus) -> Value {
        json!({
            "role": role.as_str(),
            "sessionKey": session_key,
            "sessionStatus": session_status.as_str(),
        })
    }

    pub fn pr_merged(pr_number: i64) -> Value {
        json!({ "prNumber": pr_number })
    }

    pub fn triage(action: &str, reason: Option<&str>) -> Value {
        json!({ "action": action, "reason": reason })
    }

    pub fn split(subtask_ids: &[Uuid]) -> Value {
        json!({ "action": "split", "subtaskIds": subtask_ids })
    }
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

/// Typed access to the document store.
///
/// Implementations must make [`Store::claim_ready_task`] a single
/// transaction: of two concurrent claims, exactly one succeeds and the
/// loser observes [`StoreError::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    // -- projects ---------------------------------------------------------

    async fn insert_project(&self, project: Project) -> StoreResult<()>;
    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>>;
    async fn get_project_by_slug(&self, slug: &str) -> StoreResult<Option<Project>>;
    async fn list_enabled_projects(&self) -> StoreResult<Vec<Project>>;
    /// Removes the project and cascades to its tasks (and their comments,
    /// signals, dependency edges, and events).
    async fn delete_project(&self, id: Uuid) -> StoreResult<()>;

    // -- tasks ------------------------------------------------------------

    /// Insert at the tail of the `(project, status)` lane.
    async fn insert_task(&self, task: NewTask) -> StoreResult<Task>;
    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>>;
    /// Index scan `tasks.by_project_status`.
    async fn list_tasks(&self, project_id: Uuid, status: TaskStatus) -> StoreResult<Vec<Task>>;
    /// Non-done tasks of the project that carry a PR number.
    async fn list_tasks_with_pr(&self, project_id: Uuid) -> StoreResult<Vec<Task>>;

    /// The atomic claim: `ready -> in_progress` with the dependency check
    /// inside the same transaction. Returns the updated row.
    async fn claim_ready_task(&self, task_id: Uuid) -> StoreResult<Task>;

    /// Optimistic-locked status change. Entering `done` stamps
    /// `completed_at`; entering `done`, `ready`, or `backlog` clears the
    /// agent session fields.
    async fn transition_task(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StoreResult<()>;

    /// Record the spawned agent on the task.
    async fn set_task_agent(
        &self,
        task_id: Uuid,
        session_id: &str,
        session_key: &str,
        model: &str,
    ) -> StoreResult<()>;

    /// `in_progress -> ready` after a failed spawn; clears agent fields.
    async fn revert_task_to_ready(&self, task_id: Uuid) -> StoreResult<()>;

    /// `from -> blocked`; clears agent fields and resets the retry count.
    async fn block_task(&self, task_id: Uuid, from: TaskStatus) -> StoreResult<()>;

    /// Any non-done status to `done` with the given resolution; clears
    /// agent fields and stamps `completed_at`. No-op when already done.
    async fn complete_task(&self, task_id: Uuid, resolution: Resolution) -> StoreResult<()>;

    async fn set_task_role_model(
        &self,
        task_id: Uuid,
        role: Option<Role>,
        model: Option<&str>,
    ) -> StoreResult<()>;

    /// Clear `escalated`/`escalated_at` and reset the retry count.
    async fn reset_task_escalation(&self, task_id: Uuid) -> StoreResult<()>;

    /// Set `escalated = true` with a timestamp. Only legal on a blocked
    /// task; anything else is a conflict.
    async fn escalate_task(&self, task_id: Uuid) -> StoreResult<()>;

    async fn mark_triage_sent(&self, task_id: Uuid) -> StoreResult<()>;
    async fn mark_triage_acked(&self, task_id: Uuid) -> StoreResult<()>;
    async fn set_task_branch(&self, task_id: Uuid, branch: &str) -> StoreResult<()>;
    async fn set_task_pr(&self, task_id: Uuid, pr_number: i64) -> StoreResult<()>;

    // -- dependencies -----------------------------------------------------

    /// Insert the edge without validation. Use [`Store::add_dependency`].
    async fn insert_dependency_edge(&self, task_id: Uuid, depends_on_id: Uuid) -> StoreResult<()>;
    /// Direct dependencies of a task (`task_dependencies.by_task`).
    async fn dependencies_of(&self, task_id: Uuid) -> StoreResult<Vec<Uuid>>;
    /// Direct dependents (`task_dependencies.by_depends_on`).
    async fn dependents_of(&self, depends_on_id: Uuid) -> StoreResult<Vec<Uuid>>;
    /// Ids of direct dependencies whose status is not `done`.
    async fn incomplete_dependencies(&self, task_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Validated edge insert: rejects self-edges, then walks the graph
    /// breadth-first from `depends_on_id` and rejects the edge if
    /// `task_id` is reachable (which would close a cycle).
    async fn add_dependency(&self, task_id: Uuid, depends_on_id: Uuid) -> StoreResult<()> {
        if task_id == depends_on_id {
            return Err(StoreError::SelfDependency);
        }

        let mut queue = vec![depends_on_id];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            for dep in self.dependencies_of(current).await? {
                if dep == task_id {
                    return Err(StoreError::DependencyCycle {
                        task_id,
                        depends_on_id,
                    });
                }
                queue.push(dep);
            }
        }

        self.insert_dependency_edge(task_id, depends_on_id).await
    }

    // -- comments ---------------------------------------------------------

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Comment>;
    /// Index scan `comments.by_task`, oldest first.
    async fn list_comments(&self, task_id: Uuid) -> StoreResult<Vec<Comment>>;
    /// `request_input` comments without a response, scoped to a project.
    async fn pending_request_inputs(&self, project_id: Uuid) -> StoreResult<Vec<Comment>>;

    // -- signals ----------------------------------------------------------

    async fn insert_signal(&self, signal: NewSignal) -> StoreResult<Signal>;
    /// Index scan by task, oldest first.
    async fn list_signals(&self, task_id: Uuid) -> StoreResult<Vec<Signal>>;
    /// Record a response exactly once; a second call fails with
    /// [`StoreError::AlreadyResponded`] and leaves the row unchanged.
    async fn respond_signal(&self, signal_id: Uuid, response: &str) -> StoreResult<Signal>;
    /// Blocking, unanswered signals for a project (`signals.by_blocking`).
    async fn pending_blocking_signals(&self, project_id: Uuid) -> StoreResult<Vec<Signal>>;

    // -- sessions ---------------------------------------------------------

    async fn get_session(&self, session_key: &str) -> StoreResult<Option<SessionRow>>;
    async fn upsert_session(&self, row: SessionRow) -> StoreResult<()>;

    // -- notifications ----------------------------------------------------

    async fn insert_notification(&self, notification: NewNotification)
    -> StoreResult<Notification>;
    /// Unread `escalation` notifications for a project.
    async fn unread_escalation_count(&self, project_id: Uuid) -> StoreResult<i64>;

    // -- task events ------------------------------------------------------

    async fn insert_event(&self, event: NewTaskEvent) -> StoreResult<()>;
    /// Index scan `task_events.by_task_timestamp`, oldest first.
    async fn list_events(&self, task_id: Uuid) -> StoreResult<Vec<TaskEvent>>;

    // -- prompt versions --------------------------------------------------

    /// The active version for `(role, model)`; callers fall back to
    /// `(role, None)` themselves when a model-scoped row is absent.
    async fn active_prompt_version(
        &self,
        role: Role,
        model: Option<&str>,
    ) -> StoreResult<Option<PromptVersion>>;

    /// Create version `max(existing) + 1` for the scope and atomically
    /// deactivate the previous active row.
    async fn create_prompt_version(
        &self,
        role: Role,
        model: Option<&str>,
        content: &str,
    ) -> StoreResult<PromptVersion>;

    // -- gate scans -------------------------------------------------------

    /// Ready tasks with no assignee and no incomplete dependencies.
    async fn ready_unblocked_tasks(&self, project_id: Uuid) -> StoreResult<Vec<Task>>;
    /// `in_progress` tasks not updated since `cutoff`.
    async fn stuck_tasks(&self, project_id: Uuid, cutoff: DateTime<Utc>) -> StoreResult<Vec<Task>>;
    /// Blocked tasks with `triage_sent_at` set and `triage_acked_at` unset.
    async fn unacked_triage_tasks(&self, project_id: Uuid) -> StoreResult<Vec<Task>>;
}
