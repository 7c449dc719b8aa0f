//! PostgreSQL implementation of the [`Store`] contract.
//!
//! The trait impl delegates to per-table query modules; all SQL lives in
//! those modules. Status changes use optimistic locking (`WHERE id = $1
//! AND status = $2`) so concurrent writers race at the database, and the
//! claim is a single statement with the dependency check inlined.

mod comments;
mod deps;
mod events;
mod notifications;
mod projects;
mod prompts;
mod sessions;
mod signals;
mod tasks;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    Comment, Notification, Project, PromptVersion, Resolution, Role, SessionRow, Signal, Task,
    TaskEvent, TaskStatus,
};
use crate::store::{
    NewComment, NewNotification, NewSignal, NewTask, NewTaskEvent, Store, StoreError, StoreResult,
};

/// Map a driver error onto the store error taxonomy: connectivity
/// problems become `Unavailable` (fatal for the current cycle), anything
/// else is an opaque backend error.
pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Backend(anyhow::Error::new(e)),
    }
}

/// The PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    // -- projects ---------------------------------------------------------

    async fn insert_project(&self, project: Project) -> StoreResult<()> {
        projects::insert_project(&self.pool, &project).await
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        projects::get_project(&self.pool, id).await
    }

    async fn get_project_by_slug(&self, slug: &str) -> StoreResult<Option<Project>> {
        projects::get_project_by_slug(&self.pool, slug).await
    }

    async fn list_enabled_projects(&self) -> StoreResult<Vec<Project>> {
        projects::list_enabled_projects(&self.pool).await
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<()> {
        projects::delete_project(&self.pool, id).await
    }

    // -- tasks ------------------------------------------------------------

    async fn insert_task(&self, task: NewTask) -> StoreResult<Task> {
        tasks::insert_task(&self.pool, &task).await
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        tasks::get_task(&self.pool, id).await
    }

    async fn list_tasks(&self, project_id: Uuid, status: TaskStatus) -> StoreResult<Vec<Task>> {
        tasks::list_tasks(&self.pool, project_id, status).await
    }

    async fn list_tasks_with_pr(&self, project_id: Uuid) -> StoreResult<Vec<Task>> {
        tasks::list_tasks_with_pr(&self.pool, project_id).await
    }

    async fn claim_ready_task(&self, task_id: Uuid) -> StoreResult<Task> {
        tasks::claim_ready_task(&self.pool, task_id).await
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StoreResult<()> {
        tasks::transition_task(&self.pool, task_id, from, to).await
    }

    async fn set_task_agent(
        &self,
        task_id: Uuid,
        session_id: &str,
        session_key: &str,
        model: &str,
    ) -> StoreResult<()> {
        tasks::set_task_agent(&self.pool, task_id, session_id, session_key, model).await
    }

    async fn revert_task_to_ready(&self, task_id: Uuid) -> StoreResult<()> {
        tasks::transition_task(&self.pool, task_id, TaskStatus::InProgress, TaskStatus::Ready).await
    }

    async fn block_task(&self, task_id: Uuid, from: TaskStatus) -> StoreResult<()> {
        tasks::block_task(&self.pool, task_id, from).await
    }

    async fn complete_task(&self, task_id: Uuid, resolution: Resolution) -> StoreResult<()> {
        tasks::complete_task(&self.pool, task_id, resolution).await
    }

    async fn set_task_role_model(
        &self,
        task_id: Uuid,
        role: Option<Role>,
        model: Option<&str>,
    ) -> StoreResult<()> {
        tasks::set_task_role_model(&self.pool, task_id, role, model).await
    }

    async fn reset_task_escalation(&self, task_id: Uuid) -> StoreResult<()> {
        tasks::reset_task_escalation(&self.pool, task_id).await
    }

    async fn escalate_task(&self, task_id: Uuid) -> StoreResult<()> {
        tasks::escalate_task(&self.pool, task_id).await
    }

    async fn mark_triage_sent(&self, task_id: Uuid) -> StoreResult<()> {
        tasks::mark_triage_sent(&self.pool, task_id).await
    }

    async fn mark_triage_acked(&self, task_id: Uuid) -> StoreResult<()> {
        tasks::mark_triage_acked(&self.pool, task_id).await
    }

    async fn set_task_branch(&self, task_id: Uuid, branch: &str) -> StoreResult<()> {
        tasks::set_task_branch(&self.pool, task_id, branch).await
    }

    async fn set_task_pr(&self, task_id: Uuid, pr_number: i64) -> StoreResult<()> {
        tasks::set_task_pr(&self.pool, task_id, pr_number).await
    }

    // -- dependencies -----------------------------------------------------

    async fn insert_dependency_edge(&self, task_id: Uuid, depends_on_id: Uuid) -> StoreResult<()> {
        deps::insert_dependency_edge(&self.pool, task_id, depends_on_id).await
    }

    async fn dependencies_of(&self, task_id: Uuid) -> StoreResult<Vec<Uuid>> {
        deps::dependencies_of(&self.pool, task_id).await
    }

    async fn dependents_of(&self, depends_on_id: Uuid) -> StoreResult<Vec<Uuid>> {
        deps::dependents_of(&self.pool, depends_on_id).await
    }

    async fn incomplete_dependencies(&self, task_id: Uuid) -> StoreResult<Vec<Uuid>> {
        deps::incomplete_dependencies(&self.pool, task_id).await
    }

    // -- comments ---------------------------------------------------------

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Comment> {
        comments::insert_comment(&self.pool, &comment).await
    }

    async fn list_comments(&self, task_id: Uuid) -> StoreResult<Vec<Comment>> {
        comments::list_comments(&self.pool, task_id).await
    }

    async fn pending_request_inputs(&self, project_id: Uuid) -> StoreResult<Vec<Comment>> {
        comments::pending_request_inputs(&self.pool, project_id).await
    }

    // -- signals ----------------------------------------------------------

    async fn insert_signal(&self, signal: NewSignal) -> StoreResult<Signal> {
        signals::insert_signal(&self.pool, &signal).await
    }

    async fn list_signals(&self, task_id: Uuid) -> StoreResult<Vec<Signal>> {
        signals::list_signals(&self.pool, task_id).await
    }

    async fn respond_signal(&self, signal_id: Uuid, response: &str) -> StoreResult<Signal> {
        signals::respond_signal(&self.pool, signal_id, response).await
    }

    async fn pending_blocking_signals(&self, project_id: Uuid) -> StoreResult<Vec<Signal>> {
        signals::pending_blocking_signals(&self.pool, project_id).await
    }

    // -- sessions ---------------------------------------------------------

    async fn get_session(&self, session_key: &str) -> StoreResult<Option<SessionRow>> {
        sessions::get_session(&self.pool, session_key).await
    }

    async fn upsert_session(&self, row: SessionRow) -> StoreResult<()> {
        sessions::upsert_session(&self.pool, &row).await
    }

    // -- notifications ----------------------------------------------------

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        notifications::insert_notification(&self.pool, &notification).await
    }

    async fn unread_escalation_count(&self, project_id: Uuid) -> StoreResult<i64> {
        notifications::unread_escalation_count(&self.pool, project_id).await
    }

    // -- task events ------------------------------------------------------

    async fn insert_event(&self, event: NewTaskEvent) -> StoreResult<()> {
        events::insert_event(&self.pool, &event).await
    }

    async fn list_events(&self, task_id: Uuid) -> StoreResult<Vec<TaskEvent>> {
        events::list_events(&self.pool, task_id).await
    }

    // -- prompt versions --------------------------------------------------

    async fn active_prompt_version(
        &self,
        role: Role,
        model: Option<&str>,
    ) -> StoreResult<Option<PromptVersion>> {
        prompts::active_prompt_version(&self.pool, role, model).await
    }

    async fn create_prompt_version(
        &self,
        role: Role,
        model: Option<&str>,
        content: &str,
    ) -> StoreResult<PromptVersion> {
        prompts::create_prompt_version(&self.pool, role, model, content).await
    }

    // -- gate scans -------------------------------------------------------

    async fn ready_unblocked_tasks(&self, project_id: Uuid) -> StoreResult<Vec<Task>> {
        tasks::ready_unblocked_tasks(&self.pool, project_id).await
    }

    async fn stuck_tasks(&self, project_id: Uuid, cutoff: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        tasks::stuck_tasks(&self.pool, project_id, cutoff).await
    }

    async fn unacked_triage_tasks(&self, project_id: Uuid) -> StoreResult<Vec<Task>> {
        tasks::unacked_triage_tasks(&self.pool, project_id).await
    }
}
