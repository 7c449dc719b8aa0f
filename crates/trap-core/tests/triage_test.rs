//! Triage-machine scenarios over blocked tasks, plus signal response
//! idempotence.

mod common;

use std::sync::Arc;

use trap_core::triage::{self, SubtaskSpec, TriageError};
use trap_db::models::{Priority, Role, Resolution, TaskEventType, TaskStatus};
use trap_db::store::{Store, StoreError};
use trap_test_utils::{fixtures, memory::MemoryStore};

async fn seed_blocked_task(
    store: &MemoryStore,
    project_id: uuid::Uuid,
    title: &str,
) -> trap_db::models::Task {
    let task = store
        .insert_task(fixtures::ready_task(project_id, title))
        .await
        .unwrap();
    store.claim_ready_task(task.id).await.unwrap();
    store
        .block_task(task.id, TaskStatus::InProgress)
        .await
        .unwrap();
    store.mark_triage_sent(task.id).await.unwrap();
    store.get_task(task.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn unblock_returns_task_to_ready() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "stuck").await;

    triage::unblock(store.as_ref(), task.id, "operator")
        .await
        .unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert!(!task.escalated);
    assert_eq!(task.agent_retry_count, Some(0));
    assert!(task.triage_acked_at.is_some());

    let events = store.list_events(task.id).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == TaskEventType::StatusChanged)
    );
    let comments = store.list_comments(task.id).await.unwrap();
    assert!(!comments.is_empty());

    // A second unblock no longer applies.
    let err = triage::unblock(store.as_ref(), task.id, "operator")
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::NotBlocked { .. }));
}

#[tokio::test]
async fn reassign_sets_role_and_model() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "wrong role").await;

    triage::reassign(
        store.as_ref(),
        task.id,
        Some(Role::Research),
        Some("gpt"),
        "operator",
    )
    .await
    .unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert_eq!(task.role, Some(Role::Research));
    assert_eq!(task.agent_model.as_deref(), Some("gpt"));
}

#[tokio::test]
async fn split_creates_backlog_subtasks_and_discards_the_parent() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "too big").await;

    let created = triage::split(
        store.as_ref(),
        task.id,
        vec![
            SubtaskSpec {
                title: "first half".into(),
                description: None,
                priority: Priority::High,
                role: Some(Role::Dev),
            },
            SubtaskSpec {
                title: "second half".into(),
                description: None,
                priority: Priority::Medium,
                role: None,
            },
        ],
        "operator",
    )
    .await
    .unwrap();
    assert_eq!(created.len(), 2);

    let parent = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(parent.status, TaskStatus::Done);
    assert_eq!(parent.resolution, Some(Resolution::Discarded));

    for subtask_id in &created {
        let subtask = store.get_task(*subtask_id).await.unwrap().unwrap();
        assert_eq!(subtask.status, TaskStatus::Backlog);
    }

    // The event payload carries the subtask ids.
    let events = store.list_events(task.id).await.unwrap();
    let split_event = events
        .iter()
        .find(|e| e.event_type == TaskEventType::StatusChanged)
        .unwrap();
    let ids = split_event.data.as_ref().unwrap()["subtaskIds"]
        .as_array()
        .unwrap()
        .len();
    assert_eq!(ids, 2);
}

#[tokio::test]
async fn kill_shelves_the_task_in_backlog() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "not worth it").await;

    triage::kill(store.as_ref(), task.id, "superseded by redesign", "operator")
        .await
        .unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Backlog);
    assert!(!task.escalated);

    let comments = store.list_comments(task.id).await.unwrap();
    assert!(
        comments
            .iter()
            .any(|c| c.content.contains("superseded by redesign"))
    );
}

#[tokio::test]
async fn escalate_flags_the_task_and_files_a_notification() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "needs a human").await;

    triage::escalate(store.as_ref(), task.id, Some("credentials expired"), "operator")
        .await
        .unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(task.escalated);
    assert!(task.escalated_at.is_some());

    assert_eq!(store.unread_escalation_count(project_id).await.unwrap(), 1);

    let events = store.list_events(task.id).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == TaskEventType::TriageEscalated)
    );
}

#[tokio::test]
async fn triage_rejects_non_blocked_tasks() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = store
        .insert_task(fixtures::ready_task(project_id, "still ready"))
        .await
        .unwrap();

    let err = triage::escalate(store.as_ref(), task.id, None, "operator")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TriageError::NotBlocked {
            found: TaskStatus::Ready,
            ..
        }
    ));
}

#[tokio::test]
async fn responding_to_a_signal_twice_fails_and_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "asked a question").await;

    let signal = store
        .insert_signal(fixtures::question_signal(
            task.id,
            "workloop:dev:q",
            "Which auth flow?",
        ))
        .await
        .unwrap();
    assert!(signal.is_pending());

    let answered = store.respond_signal(signal.id, "OAuth").await.unwrap();
    assert_eq!(answered.response.as_deref(), Some("OAuth"));
    let first_responded_at = answered.responded_at;

    let err = store
        .respond_signal(signal.id, "Basic auth actually")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyResponded(_)));

    // The stored row is unchanged by the rejected second response.
    let signals = store.list_signals(task.id).await.unwrap();
    assert_eq!(signals[0].response.as_deref(), Some("OAuth"));
    assert_eq!(signals[0].responded_at, first_responded_at);
}

#[tokio::test]
async fn blocker_comment_is_the_latest_message() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = seed_blocked_task(&store, project_id, "confusing").await;

    for (kind, content) in [
        (trap_db::models::CommentType::Message, "first message"),
        (trap_db::models::CommentType::StatusChange, "moved around"),
        (trap_db::models::CommentType::Message, "actual blocker"),
    ] {
        store
            .insert_comment(trap_db::store::NewComment {
                id: uuid::Uuid::new_v4(),
                task_id: task.id,
                author: "agent-1".into(),
                author_type: trap_db::models::AuthorType::Agent,
                content: content.into(),
                kind,
            })
            .await
            .unwrap();
    }

    let blocker = triage::blocker_comment(store.as_ref(), task.id)
        .await
        .unwrap();
    assert_eq!(blocker.as_deref(), Some("actual blocker"));
}
