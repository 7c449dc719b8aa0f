//! Work-phase scenarios: claiming order, dependency gating, capacity
//! denials, and spawn failure recovery. Everything runs against the
//! in-memory store with a fake gateway.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use trap_core::phases::work;
use trap_db::models::{Priority, Role, TaskEventType, TaskStatus};
use trap_db::store::Store;
use trap_test_utils::{fixtures, memory::MemoryStore};

use common::{FakeGateway, FakeGitHub, test_config, test_env};

async fn seed_dev_prompt(store: &MemoryStore) {
    store
        .create_prompt_version(Role::Dev, None, "You are a dev agent.")
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_dev_path_claims_and_spawns() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    let github = Arc::new(FakeGitHub::new());
    seed_dev_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();

    let task_id = Uuid::parse_str("aaaaaaaa-0000-0000-0000-000000000001").unwrap();
    store
        .insert_task(fixtures::ready_task_with(
            task_id,
            project_id,
            "implement feature",
            Priority::High,
        ))
        .await
        .unwrap();

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        github,
        test_config(),
    );
    work::run(&env, &project).await.unwrap();

    let task = store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    let expected_key = format!("workloop:dev:{task_id}");
    assert_eq!(task.agent_session_key.as_deref(), Some(expected_key.as_str()));
    assert!(task.session_id.is_some());

    assert_eq!(gateway.sent_keys(), vec![expected_key]);

    let events = store.list_events(task_id).await.unwrap();
    let kinds: Vec<TaskEventType> = events.iter().map(|e| e.event_type).collect();
    assert!(kinds.contains(&TaskEventType::StatusChanged));
    assert!(kinds.contains(&TaskEventType::AgentAssigned));
    let status_changed = events
        .iter()
        .find(|e| e.event_type == TaskEventType::StatusChanged)
        .unwrap();
    let data = status_changed.data.as_ref().unwrap();
    assert_eq!(data["from"], "ready");
    assert_eq!(data["to"], "in_progress");
}

#[tokio::test]
async fn dependency_blocks_until_dependency_done() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    seed_dev_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();

    // A sorts before B by position; B depends on A.
    let a = store
        .insert_task(fixtures::ready_task(project_id, "a"))
        .await
        .unwrap();
    let b = store
        .insert_task(fixtures::ready_task(project_id, "b"))
        .await
        .unwrap();
    store.add_dependency(b.id, a.id).await.unwrap();

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::new(FakeGitHub::new()),
        test_config(),
    );

    // Cycle 1 claims A (first by position); B is dependency-blocked.
    work::run(&env, &project).await.unwrap();
    assert_eq!(
        store.get_task(a.id).await.unwrap().unwrap().status,
        TaskStatus::InProgress
    );
    assert_eq!(
        store.get_task(b.id).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );

    // Another cycle: A is no longer ready, B still blocked by A.
    work::run(&env, &project).await.unwrap();
    assert_eq!(
        store.get_task(b.id).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );

    // Finish A; the next cycle claims B. Clear A's handle first so
    // capacity is free.
    env.agents.kill(a.id).await.unwrap();
    store
        .upsert_session(fixtures::session(
            &format!("workloop:dev:{}", a.id),
            trap_db::models::SessionStatus::Completed,
        ))
        .await
        .unwrap();
    env.agents.reap().await.unwrap();
    store
        .complete_task(a.id, trap_db::models::Resolution::Completed)
        .await
        .unwrap();

    work::run(&env, &project).await.unwrap();
    assert_eq!(
        store.get_task(b.id).await.unwrap().unwrap().status,
        TaskStatus::InProgress
    );
}

#[tokio::test]
async fn priority_orders_claims_urgent_first() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    seed_dev_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();

    let low = store
        .insert_task(fixtures::ready_task_with(
            Uuid::new_v4(),
            project_id,
            "low",
            Priority::Low,
        ))
        .await
        .unwrap();
    let urgent = store
        .insert_task(fixtures::ready_task_with(
            Uuid::new_v4(),
            project_id,
            "urgent",
            Priority::Urgent,
        ))
        .await
        .unwrap();

    let env = test_env(
        Arc::clone(&store),
        gateway,
        Arc::new(FakeGitHub::new()),
        test_config(),
    );
    work::run(&env, &project).await.unwrap();

    // The urgent task wins despite its later position.
    assert_eq!(
        store.get_task(urgent.id).await.unwrap().unwrap().status,
        TaskStatus::InProgress
    );
    assert_eq!(
        store.get_task(low.id).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );
}

#[tokio::test]
async fn claims_at_most_one_task_per_cycle() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    seed_dev_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();
    for i in 0..3 {
        store
            .insert_task(fixtures::ready_task(project_id, &format!("task {i}")))
            .await
            .unwrap();
    }

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::new(FakeGitHub::new()),
        test_config(),
    );
    work::run(&env, &project).await.unwrap();

    let in_progress = store
        .list_tasks(project_id, TaskStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(gateway.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn dev_limit_denies_the_third_claim() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    seed_dev_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();
    for i in 0..3 {
        store
            .insert_task(fixtures::ready_task(project_id, &format!("task {i}")))
            .await
            .unwrap();
    }

    let mut config = test_config();
    config.limits.max_dev_agents = 2;
    // Keep the project limit out of the way so the dev limit decides.
    config.limits.max_agents_per_project = 10;
    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::new(FakeGitHub::new()),
        config,
    );

    work::run(&env, &project).await.unwrap();
    work::run(&env, &project).await.unwrap();
    assert_eq!(env.agents.active_count(None, Some(Role::Dev)), 2);

    // Third cycle: the dev pool is full, nothing is claimed.
    work::run(&env, &project).await.unwrap();
    let ready = store.list_tasks(project_id, TaskStatus::Ready).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(gateway.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_prompt_reverts_the_claim() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    // No prompt version seeded.

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();
    let task = store
        .insert_task(fixtures::ready_task(project_id, "no prompt"))
        .await
        .unwrap();

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::new(FakeGitHub::new()),
        test_config(),
    );
    work::run(&env, &project).await.unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert!(task.agent_session_key.is_none());
    assert!(gateway.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gateway_unavailable_reverts_and_skips_the_cycle() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    gateway.set_unavailable(true);
    seed_dev_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();
    let task = store
        .insert_task(fixtures::ready_task(project_id, "unlucky"))
        .await
        .unwrap();

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::new(FakeGitHub::new()),
        test_config(),
    );
    work::run(&env, &project).await.unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert!(task.agent_session_key.is_none());
    assert!(!env.agents.has(task.id));
}
