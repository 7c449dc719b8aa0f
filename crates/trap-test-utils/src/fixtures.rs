//! Fixture builders for scenario tests.

use chrono::Utc;
use uuid::Uuid;

use trap_db::models::{
    ChatLayout, Priority, Project, Role, SessionRow, SessionStatus, TaskStatus,
};
use trap_db::store::{NewSignal, NewTask};

/// A deterministic UUID whose first byte is `byte`; handy for asserting
/// on id prefixes.
pub fn uuid_from(byte: u8) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0] = byte;
    Uuid::from_bytes(bytes)
}

/// A work-loop-enabled project with sensible defaults.
pub fn project(slug: &str) -> Project {
    let now = Utc::now();
    Project {
        id: Uuid::new_v4(),
        slug: slug.to_owned(),
        name: slug.to_owned(),
        color: "#6b7280".to_owned(),
        repo_url: None,
        local_path: Some(format!("/tmp/{slug}")),
        github_repo: Some(format!("example/{slug}")),
        chat_layout: ChatLayout::Slack,
        work_loop_enabled: true,
        work_loop_max_agents: None,
        work_loop_schedule: "*/5 * * * *".to_owned(),
        created_at: now,
        updated_at: now,
    }
}

/// A `ready` dev task with medium priority.
pub fn ready_task(project_id: Uuid, title: &str) -> NewTask {
    let mut task = NewTask::new(Uuid::new_v4(), project_id, title);
    task.status = TaskStatus::Ready;
    task.role = Some(Role::Dev);
    task
}

/// Same as [`ready_task`] but with a fixed id and priority.
pub fn ready_task_with(
    id: Uuid,
    project_id: Uuid,
    title: &str,
    priority: Priority,
) -> NewTask {
    let mut task = NewTask::new(id, project_id, title);
    task.status = TaskStatus::Ready;
    task.role = Some(Role::Dev);
    task.priority = priority;
    task
}

/// A session row in the given state.
pub fn session(key: &str, status: SessionStatus) -> SessionRow {
    SessionRow {
        session_key: key.to_owned(),
        status,
        model: Some("moonshot/kimi-for-coding".to_owned()),
        input_tokens: 0,
        output_tokens: 0,
        total_tokens: 0,
        last_active_at: Utc::now(),
    }
}

/// A blocking `question` signal from an agent.
pub fn question_signal(task_id: Uuid, session_key: &str, message: &str) -> NewSignal {
    NewSignal {
        id: Uuid::new_v4(),
        task_id,
        session_key: session_key.to_owned(),
        agent_id: "agent-1".to_owned(),
        kind: trap_db::models::SignalKind::Question,
        severity: trap_db::models::SignalSeverity::Normal,
        message: message.to_owned(),
    }
}
