//! In-memory [`Store`] backend.
//!
//! Every table is a map behind one mutex, so each trait method is atomic
//! and the claim/transition paths observe the same optimistic semantics
//! as the SQL backend. Intended for tests; nothing survives the process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use trap_db::models::{
    Comment, Notification, POSITION_STEP, Project, PromptVersion, Resolution, Role, SessionRow,
    Signal, Task, TaskDependency, TaskEvent, TaskStatus,
};
use trap_db::store::{
    NewComment, NewNotification, NewSignal, NewTask, NewTaskEvent, Store, StoreError, StoreResult,
};

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    tasks: HashMap<Uuid, Task>,
    deps: Vec<TaskDependency>,
    comments: Vec<Comment>,
    signals: HashMap<Uuid, Signal>,
    sessions: HashMap<String, SessionRow>,
    notifications: Vec<Notification>,
    events: Vec<TaskEvent>,
    prompts: Vec<PromptVersion>,
}

impl Tables {
    fn lane_tail(&self, project_id: Uuid, status: TaskStatus) -> i64 {
        self.tasks
            .values()
            .filter(|t| t.project_id == project_id && t.status == status)
            .map(|t| t.position)
            .max()
            .unwrap_or(0)
            + POSITION_STEP
    }

    fn incomplete_deps(&self, task_id: Uuid) -> Vec<Uuid> {
        self.deps
            .iter()
            .filter(|d| d.task_id == task_id)
            .filter(|d| {
                self.tasks
                    .get(&d.depends_on_id)
                    .is_none_or(|t| t.status != TaskStatus::Done)
            })
            .map(|d| d.depends_on_id)
            .collect()
    }
}

/// An in-process store with no persistence.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with
    /// [`StoreError::Unavailable`]; used to exercise the fatal-cycle path.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self.tables.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn not_found(kind: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound { kind, id }
}

fn clears_agent_fields(to: TaskStatus) -> bool {
    matches!(
        to,
        TaskStatus::Done | TaskStatus::Ready | TaskStatus::Backlog
    )
}

#[async_trait]
impl Store for MemoryStore {
    // -- projects ---------------------------------------------------------

    async fn insert_project(&self, project: Project) -> StoreResult<()> {
        self.lock()?.projects.insert(project.id, project);
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.lock()?.projects.get(&id).cloned())
    }

    async fn get_project_by_slug(&self, slug: &str) -> StoreResult<Option<Project>> {
        Ok(self
            .lock()?
            .projects
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn list_enabled_projects(&self) -> StoreResult<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .lock()?
            .projects
            .values()
            .filter(|p| p.work_loop_enabled)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(projects)
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if tables.projects.remove(&id).is_none() {
            return Err(not_found("project", id));
        }
        let task_ids: Vec<Uuid> = tables
            .tasks
            .values()
            .filter(|t| t.project_id == id)
            .map(|t| t.id)
            .collect();
        for task_id in &task_ids {
            tables.tasks.remove(task_id);
        }
        tables
            .deps
            .retain(|d| !task_ids.contains(&d.task_id) && !task_ids.contains(&d.depends_on_id));
        tables.comments.retain(|c| !task_ids.contains(&c.task_id));
        tables.signals.retain(|_, s| !task_ids.contains(&s.task_id));
        tables.events.retain(|e| e.project_id != id);
        Ok(())
    }

    // -- tasks ------------------------------------------------------------

    async fn insert_task(&self, new: NewTask) -> StoreResult<Task> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let position = tables.lane_tail(new.project_id, new.status);
        let task = Task {
            id: new.id,
            project_id: new.project_id,
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            role: new.role,
            assignee: new.assignee,
            requires_human_review: new.requires_human_review,
            tags: new.tags,
            position,
            session_id: None,
            agent_session_key: None,
            agent_model: None,
            agent_started_at: None,
            agent_last_active_at: None,
            agent_retry_count: None,
            branch: None,
            pr_number: None,
            escalated: false,
            escalated_at: None,
            triage_sent_at: None,
            triage_acked_at: None,
            resolution: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        tables.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self.lock()?.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, project_id: Uuid, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        Ok(tasks)
    }

    async fn list_tasks_with_pr(&self, project_id: Uuid) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && t.pr_number.is_some()
                    && t.status != TaskStatus::Done
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        Ok(tasks)
    }

    async fn claim_ready_task(&self, task_id: Uuid) -> StoreResult<Task> {
        let mut tables = self.lock()?;
        let current = tables
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| not_found("task", task_id))?;
        if current.status != TaskStatus::Ready {
            return Err(StoreError::Conflict {
                task_id,
                expected: TaskStatus::Ready,
                found: current.status,
            });
        }
        let unmet = tables.incomplete_deps(task_id);
        if !unmet.is_empty() {
            return Err(StoreError::DependencyUnmet {
                task_id,
                unmet: unmet.len(),
            });
        }
        let position = tables.lane_tail(current.project_id, TaskStatus::InProgress);
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.status = TaskStatus::InProgress;
        task.position = position;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let current = tables
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| not_found("task", task_id))?;
        if current.status != from {
            return Err(StoreError::Conflict {
                task_id,
                expected: from,
                found: current.status,
            });
        }
        if from == TaskStatus::Backlog {
            let unmet = tables.incomplete_deps(task_id);
            if !unmet.is_empty() {
                return Err(StoreError::DependencyUnmet {
                    task_id,
                    unmet: unmet.len(),
                });
            }
        }
        let position = tables.lane_tail(current.project_id, to);
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.status = to;
        task.position = position;
        task.updated_at = Utc::now();
        if to == TaskStatus::Done {
            task.completed_at = Some(Utc::now());
        }
        if clears_agent_fields(to) {
            task.session_id = None;
            task.agent_session_key = None;
        }
        Ok(())
    }

    async fn set_task_agent(
        &self,
        task_id: Uuid,
        session_id: &str,
        session_key: &str,
        model: &str,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.session_id = Some(session_id.to_owned());
        task.agent_session_key = Some(session_key.to_owned());
        task.agent_model = Some(model.to_owned());
        task.agent_started_at = Some(Utc::now());
        task.agent_last_active_at = Some(Utc::now());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn revert_task_to_ready(&self, task_id: Uuid) -> StoreResult<()> {
        self.transition_task(task_id, TaskStatus::InProgress, TaskStatus::Ready)
            .await
    }

    async fn block_task(&self, task_id: Uuid, from: TaskStatus) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let current = tables
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| not_found("task", task_id))?;
        if current.status != from {
            return Err(StoreError::Conflict {
                task_id,
                expected: from,
                found: current.status,
            });
        }
        let position = tables.lane_tail(current.project_id, TaskStatus::Blocked);
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.status = TaskStatus::Blocked;
        task.position = position;
        task.session_id = None;
        task.agent_session_key = None;
        task.agent_retry_count = Some(0);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_task(&self, task_id: Uuid, resolution: Resolution) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let current = tables
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| not_found("task", task_id))?;
        if current.status == TaskStatus::Done {
            return Ok(());
        }
        let position = tables.lane_tail(current.project_id, TaskStatus::Done);
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.status = TaskStatus::Done;
        task.resolution = Some(resolution);
        task.position = position;
        task.completed_at = Some(Utc::now());
        task.session_id = None;
        task.agent_session_key = None;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_task_role_model(
        &self,
        task_id: Uuid,
        role: Option<Role>,
        model: Option<&str>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        if let Some(role) = role {
            task.role = Some(role);
        }
        if let Some(model) = model {
            task.agent_model = Some(model.to_owned());
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_task_escalation(&self, task_id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.escalated = false;
        task.escalated_at = None;
        task.agent_retry_count = Some(0);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn escalate_task(&self, task_id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        if task.status != TaskStatus::Blocked {
            return Err(StoreError::Conflict {
                task_id,
                expected: TaskStatus::Blocked,
                found: task.status,
            });
        }
        task.escalated = true;
        task.escalated_at = Some(Utc::now());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_triage_sent(&self, task_id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.triage_sent_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_triage_acked(&self, task_id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.triage_acked_at = Some(Utc::now());
        Ok(())
    }

    async fn set_task_branch(&self, task_id: Uuid, branch: &str) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.branch = Some(branch.to_owned());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_task_pr(&self, task_id: Uuid, pr_number: i64) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| not_found("task", task_id))?;
        task.pr_number = Some(pr_number);
        task.updated_at = Utc::now();
        Ok(())
    }

    // -- dependencies -----------------------------------------------------

    async fn insert_dependency_edge(&self, task_id: Uuid, depends_on_id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let exists = tables
            .deps
            .iter()
            .any(|d| d.task_id == task_id && d.depends_on_id == depends_on_id);
        if !exists {
            tables.deps.push(TaskDependency {
                task_id,
                depends_on_id,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn dependencies_of(&self, task_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .lock()?
            .deps
            .iter()
            .filter(|d| d.task_id == task_id)
            .map(|d| d.depends_on_id)
            .collect())
    }

    async fn dependents_of(&self, depends_on_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .lock()?
            .deps
            .iter()
            .filter(|d| d.depends_on_id == depends_on_id)
            .map(|d| d.task_id)
            .collect())
    }

    async fn incomplete_dependencies(&self, task_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self.lock()?.incomplete_deps(task_id))
    }

    // -- comments ---------------------------------------------------------

    async fn insert_comment(&self, new: NewComment) -> StoreResult<Comment> {
        let comment = Comment {
            id: new.id,
            task_id: new.task_id,
            author: new.author,
            author_type: new.author_type,
            content: new.content,
            kind: new.kind,
            responded_at: None,
            created_at: Utc::now(),
        };
        self.lock()?.comments.push(comment.clone());
        Ok(comment)
    }

    async fn list_comments(&self, task_id: Uuid) -> StoreResult<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .lock()?
            .comments
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn pending_request_inputs(&self, project_id: Uuid) -> StoreResult<Vec<Comment>> {
        let tables = self.lock()?;
        let mut comments: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| {
                c.kind == trap_db::models::CommentType::RequestInput
                    && c.responded_at.is_none()
                    && tables
                        .tasks
                        .get(&c.task_id)
                        .is_some_and(|t| t.project_id == project_id)
            })
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    // -- signals ----------------------------------------------------------

    async fn insert_signal(&self, new: NewSignal) -> StoreResult<Signal> {
        let signal = Signal {
            id: new.id,
            task_id: new.task_id,
            session_key: new.session_key,
            agent_id: new.agent_id,
            kind: new.kind,
            severity: new.severity,
            message: new.message,
            blocking: new.kind.is_blocking(),
            responded_at: None,
            response: None,
            delivered_at: None,
            created_at: Utc::now(),
        };
        self.lock()?.signals.insert(signal.id, signal.clone());
        Ok(signal)
    }

    async fn list_signals(&self, task_id: Uuid) -> StoreResult<Vec<Signal>> {
        let mut signals: Vec<Signal> = self
            .lock()?
            .signals
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        signals.sort_by_key(|s| s.created_at);
        Ok(signals)
    }

    async fn respond_signal(&self, signal_id: Uuid, response: &str) -> StoreResult<Signal> {
        let mut tables = self.lock()?;
        let signal = tables
            .signals
            .get_mut(&signal_id)
            .ok_or_else(|| not_found("signal", signal_id))?;
        if signal.responded_at.is_some() {
            return Err(StoreError::AlreadyResponded(signal_id));
        }
        signal.responded_at = Some(Utc::now());
        signal.response = Some(response.to_owned());
        Ok(signal.clone())
    }

    async fn pending_blocking_signals(&self, project_id: Uuid) -> StoreResult<Vec<Signal>> {
        let tables = self.lock()?;
        let mut signals: Vec<Signal> = tables
            .signals
            .values()
            .filter(|s| {
                s.is_pending()
                    && tables
                        .tasks
                        .get(&s.task_id)
                        .is_some_and(|t| t.project_id == project_id)
            })
            .cloned()
            .collect();
        signals.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(signals)
    }

    // -- sessions ---------------------------------------------------------

    async fn get_session(&self, session_key: &str) -> StoreResult<Option<SessionRow>> {
        Ok(self.lock()?.sessions.get(session_key).cloned())
    }

    async fn upsert_session(&self, row: SessionRow) -> StoreResult<()> {
        self.lock()?.sessions.insert(row.session_key.clone(), row);
        Ok(())
    }

    // -- notifications ----------------------------------------------------

    async fn insert_notification(
        &self,
        new: NewNotification,
    ) -> StoreResult<Notification> {
        let notification = Notification {
            id: new.id,
            task_id: new.task_id,
            project_id: new.project_id,
            kind: new.kind,
            severity: new.severity,
            title: new.title,
            message: new.message,
            agent: new.agent,
            read: false,
            created_at: Utc::now(),
        };
        self.lock()?.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn unread_escalation_count(&self, project_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .filter(|n| {
                n.project_id == Some(project_id)
                    && n.kind == trap_db::models::NotificationType::Escalation
                    && !n.read
            })
            .count() as i64)
    }

    // -- task events ------------------------------------------------------

    async fn insert_event(&self, new: NewTaskEvent) -> StoreResult<()> {
        let event = TaskEvent {
            id: Uuid::new_v4(),
            task_id: new.task_id,
            project_id: new.project_id,
            event_type: new.event_type,
            timestamp: Utc::now(),
            actor: new.actor,
            data: new.data,
        };
        self.lock()?.events.push(event);
        Ok(())
    }

    async fn list_events(&self, task_id: Uuid) -> StoreResult<Vec<TaskEvent>> {
        let mut events: Vec<TaskEvent> = self
            .lock()?
            .events
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    // -- prompt versions --------------------------------------------------

    async fn active_prompt_version(
        &self,
        role: Role,
        model: Option<&str>,
    ) -> StoreResult<Option<PromptVersion>> {
        Ok(self
            .lock()?
            .prompts
            .iter()
            .find(|p| p.role == role && p.model.as_deref() == model && p.active)
            .cloned())
    }

    async fn create_prompt_version(
        &self,
        role: Role,
        model: Option<&str>,
        content: &str,
    ) -> StoreResult<PromptVersion> {
        let mut tables = self.lock()?;
        let next = tables
            .prompts
            .iter()
            .filter(|p| p.role == role && p.model.as_deref() == model)
            .map(|p| p.version)
            .max()
            .unwrap_or(0)
            + 1;
        for prompt in tables
            .prompts
            .iter_mut()
            .filter(|p| p.role == role && p.model.as_deref() == model)
        {
            prompt.active = false;
        }
        let row = PromptVersion {
            id: Uuid::new_v4(),
            role,
            model: model.map(str::to_owned),
            version: next,
            content: content.to_owned(),
            active: true,
            created_at: Utc::now(),
        };
        tables.prompts.push(row.clone());
        Ok(row)
    }

    // -- gate scans -------------------------------------------------------

    async fn ready_unblocked_tasks(&self, project_id: Uuid) -> StoreResult<Vec<Task>> {
        let tables = self.lock()?;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && t.status == TaskStatus::Ready
                    && t.assignee.is_none()
                    && tables.incomplete_deps(t.id).is_empty()
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        Ok(tasks)
    }

    async fn stuck_tasks(&self, project_id: Uuid, cutoff: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && t.status == TaskStatus::InProgress
                    && t.updated_at < cutoff
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.updated_at);
        Ok(tasks)
    }

    async fn unacked_triage_tasks(&self, project_id: Uuid) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && t.status == TaskStatus::Blocked
                    && t.triage_sent_at.is_some()
                    && t.triage_acked_at.is_none()
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.triage_sent_at);
        Ok(tasks)
    }
}
