//! Triage: the five resolutions of a blocked task.
//!
//! Every operation validates that the task is still blocked, applies its
//! transition, stamps `triage_acked_at`, appends an audit event, and
//! leaves an explanatory comment. Operations are thin and named; the
//! store's optimistic transitions arbitrate races.

use thiserror::Error;
use uuid::Uuid;

use trap_db::models::{
    NotificationSeverity, NotificationType, Priority, Role, Resolution, Task, TaskEventType,
    TaskStatus,
};
use trap_db::store::{
    NewComment, NewNotification, NewTask, NewTaskEvent, Store, StoreError, event_data,
};

/// Errors from triage operations.
#[derive(Debug, Error)]
pub enum TriageError {
    /// The task is not blocked (any more); the operation does not apply.
    #[error("task {task_id} is {found}, not blocked")]
    NotBlocked { task_id: Uuid, found: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A subtask requested by [`split`].
#[derive(Debug, Clone)]
pub struct SubtaskSpec {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub role: Option<Role>,
}

async fn require_blocked(store: &dyn Store, task_id: Uuid) -> Result<Task, TriageError> {
    let task = store
        .get_task(task_id)
        .await?
        .ok_or(StoreError::NotFound {
            kind: "task",
            id: task_id,
        })?;
    if task.status != TaskStatus::Blocked {
        return Err(TriageError::NotBlocked {
            task_id,
            found: task.status,
        });
    }
    Ok(task)
}

async fn record(
    store: &dyn Store,
    task: &Task,
    event_type: TaskEventType,
    actor: &str,
    data: serde_json::Value,
    comment: String,
) -> Result<(), TriageError> {
    store
        .insert_event(
            NewTaskEvent::new(task.id, task.project_id, event_type)
                .with_actor(actor)
                .with_data(data),
        )
        .await?;
    store
        .insert_comment(NewComment::system(task.id, comment))
        .await?;
    store.mark_triage_acked(task.id).await?;
    Ok(())
}

/// `blocked -> ready`: clear the escalation flag and retry count so the
/// work phase can claim the task again.
pub async fn unblock(store: &dyn Store, task_id: Uuid, actor: &str) -> Result<(), TriageError> {
    let task = require_blocked(store, task_id).await?;
    store.reset_task_escalation(task_id).await?;
    store
        .transition_task(task_id, TaskStatus::Blocked, TaskStatus::Ready)
        .await?;
    record(
        store,
        &task,
        TaskEventType::StatusChanged,
        actor,
        event_data::status_changed(TaskStatus::Blocked, TaskStatus::Ready),
        format!("Unblocked by {actor}; back to ready."),
    )
    .await?;
    tracing::info!(task_id = %task_id, actor, "triage: unblocked");
    Ok(())
}

/// `blocked -> ready` with a new role and/or model hint.
pub async fn reassign(
    store: &dyn Store,
    task_id: Uuid,
    role: Option<Role>,
    model: Option<&str>,
    actor: &str,
) -> Result<(), TriageError> {
    let task = require_blocked(store, task_id).await?;
    store.set_task_role_model(task_id, role, model).await?;
    store.reset_task_escalation(task_id).await?;
    store
        .transition_task(task_id, TaskStatus::Blocked, TaskStatus::Ready)
        .await?;

    let described = match (role, model) {
        (Some(role), Some(model)) => format!("as {role} on {model}"),
        (Some(role), None) => format!("as {role}"),
        (None, Some(model)) => format!("on {model}"),
        (None, None) => "unchanged".to_owned(),
    };
    record(
        store,
        &task,
        TaskEventType::StatusChanged,
        actor,
        event_data::triage("reassign", Some(&described)),
        format!("Reassigned by {actor} ({described}); back to ready."),
    )
    .await?;
    tracing::info!(task_id = %task_id, actor, "triage: reassigned");
    Ok(())
}

/// Replace a blocked task with backlog subtasks. The parent completes
/// with `resolution = discarded`; the subtask ids land in the event data.
pub async fn split(
    store: &dyn Store,
    task_id: Uuid,
    subtasks: Vec<SubtaskSpec>,
    actor: &str,
) -> Result<Vec<Uuid>, TriageError> {
    let task = require_blocked(store, task_id).await?;

    let mut created = Vec::with_capacity(subtasks.len());
    for spec in subtasks {
        let mut new_task = NewTask::new(Uuid::new_v4(), task.project_id, spec.title);
        new_task.description = spec.description;
        new_task.priority = spec.priority;
        new_task.role = spec.role;
        let inserted = store.insert_task(new_task).await?;
        created.push(inserted.id);
    }

    store.complete_task(task_id, Resolution::Discarded).await?;
    record(
        store,
        &task,
        TaskEventType::StatusChanged,
        actor,
        event_data::split(&created),
        format!(
            "Split by {actor} into {} subtask(s); parent closed.",
            created.len()
        ),
    )
    .await?;
    tracing::info!(task_id = %task_id, subtasks = created.len(), actor, "triage: split");
    Ok(created)
}

/// `blocked -> backlog`: shelve the task with a reason.
pub async fn kill(
    store: &dyn Store,
    task_id: Uuid,
    reason: &str,
    actor: &str,
) -> Result<(), TriageError> {
    let task = require_blocked(store, task_id).await?;
    store.reset_task_escalation(task_id).await?;
    store
        .transition_task(task_id, TaskStatus::Blocked, TaskStatus::Backlog)
        .await?;
    record(
        store,
        &task,
        TaskEventType::StatusChanged,
        actor,
        event_data::triage("kill", Some(reason)),
        format!("Sent back to backlog by {actor}: {reason}"),
    )
    .await?;
    tracing::info!(task_id = %task_id, actor, "triage: killed to backlog");
    Ok(())
}

/// Keep the task blocked but escalate it to the coordinator: sets the
/// escalation flag and files a critical notification.
pub async fn escalate(
    store: &dyn Store,
    task_id: Uuid,
    reason: Option<&str>,
    actor: &str,
) -> Result<(), TriageError> {
    let task = require_blocked(store, task_id).await?;
    store.escalate_task(task_id).await?;

    let message = reason
        .map(str::to_owned)
        .unwrap_or_else(|| "Blocked task escalated for coordinator attention.".to_owned());
    store
        .insert_notification(NewNotification {
            id: Uuid::new_v4(),
            task_id: Some(task_id),
            project_id: Some(task.project_id),
            kind: NotificationType::Escalation,
            severity: NotificationSeverity::Critical,
            title: format!("Escalated: {}", task.title),
            message: message.clone(),
            agent: None,
        })
        .await?;
    record(
        store,
        &task,
        TaskEventType::TriageEscalated,
        actor,
        event_data::triage("escalate", reason),
        format!("Escalated by {actor}: {message}"),
    )
    .await?;
    tracing::warn!(task_id = %task_id, actor, "triage: escalated");
    Ok(())
}

/// The blocker description shown to the coordinator: the latest
/// `message`-type comment. No dedicated blocker comment type exists, so
/// this heuristic stands until one does.
pub async fn blocker_comment(
    store: &dyn Store,
    task_id: Uuid,
) -> Result<Option<String>, StoreError> {
    let comments = store.list_comments(task_id).await?;
    Ok(comments
        .into_iter()
        .rev()
        .find(|c| c.kind == trap_db::models::CommentType::Message)
        .map(|c| c.content))
}
