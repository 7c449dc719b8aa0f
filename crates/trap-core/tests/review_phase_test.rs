//! Review-phase scenarios: reviewer dispatch, the recently-reaped
//! cooldown, and merged-PR completion.

mod common;

use std::sync::Arc;

use trap_core::agents::models::REVIEWER_MODEL;
use trap_core::github::{PrInfo, PrState};
use trap_core::phases::review;
use trap_db::models::{Resolution, Role, SessionStatus, TaskStatus};
use trap_db::store::Store;
use trap_test_utils::{fixtures, memory::MemoryStore};

use common::{FakeGateway, FakeGitHub, test_config, test_env};

async fn seed_reviewer_prompt(store: &MemoryStore) {
    store
        .create_prompt_version(Role::Reviewer, None, "You are a code reviewer.")
        .await
        .unwrap();
}

async fn seed_in_review_task(
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
        .transition_task(task.id, TaskStatus::InProgress, TaskStatus::InReview)
        .await
        .unwrap();
    store.get_task(task.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn spawns_reviewer_for_open_pr() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    let github = Arc::new(FakeGitHub::new());
    seed_reviewer_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();

    let task = seed_in_review_task(&store, project_id, "awaiting review").await;
    let branch = format!("fix/{}", task.short_prefix());
    github.add_pr(PrInfo {
        number: 7,
        state: PrState::Open,
        head_ref: branch.clone(),
    });

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        github,
        test_config(),
    );
    review::run(&env, &project).await.unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    let expected_key = format!("workloop:reviewer:{}", task.id);
    assert_eq!(task.agent_session_key.as_deref(), Some(expected_key.as_str()));
    // The discovered PR and branch are recorded.
    assert_eq!(task.pr_number, Some(7));
    assert_eq!(task.branch.as_deref(), Some(branch.as_str()));

    let sent = gateway.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].model.as_deref(), Some(REVIEWER_MODEL));
    assert!(sent[0].message.contains("#7"));
}

#[tokio::test]
async fn recently_reaped_reviewer_is_not_respawned() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    let github = Arc::new(FakeGitHub::new());
    seed_reviewer_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();

    let task = seed_in_review_task(&store, project_id, "reviewed already").await;
    github.add_pr(PrInfo {
        number: 9,
        state: PrState::Open,
        head_ref: format!("fix/{}", task.short_prefix()),
    });

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        github,
        test_config(),
    );

    // Cycle N: reviewer spawns, then its session ends and is reaped.
    review::run(&env, &project).await.unwrap();
    assert_eq!(gateway.sent.lock().unwrap().len(), 1);
    let key = format!("workloop:reviewer:{}", task.id);
    store
        .upsert_session(fixtures::session(&key, SessionStatus::Completed))
        .await
        .unwrap();
    let reaped = env.agents.reap().await.unwrap();
    assert_eq!(reaped.len(), 1);

    // Cycle N+1: the cooldown holds the reviewer back.
    review::run(&env, &project).await.unwrap();
    assert_eq!(gateway.sent.lock().unwrap().len(), 1);
    assert!(env.agents.is_recently_reaped(task.id, Role::Reviewer));
}

#[tokio::test]
async fn merged_pr_by_number_completes_the_task() {
    let store = Arc::new(MemoryStore::new());
    let github = Arc::new(FakeGitHub::new());
    seed_reviewer_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();

    let task = seed_in_review_task(&store, project_id, "merged underneath").await;
    store.set_task_pr(task.id, 11).await.unwrap();
    github.add_pr(PrInfo {
        number: 11,
        state: PrState::Merged,
        head_ref: format!("fix/{}", task.short_prefix()),
    });

    let env = test_env(
        Arc::clone(&store),
        Arc::new(FakeGateway::new()),
        github,
        test_config(),
    );
    review::run(&env, &project).await.unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.resolution, Some(Resolution::Merged));
}

#[tokio::test]
async fn no_pr_means_no_reviewer() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    seed_reviewer_prompt(&store).await;

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project.clone()).await.unwrap();
    let task = seed_in_review_task(&store, project_id, "no pr yet").await;

    let env = test_env(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::new(FakeGitHub::new()),
        test_config(),
    );
    review::run(&env, &project).await.unwrap();

    assert!(gateway.sent.lock().unwrap().is_empty());
    assert_eq!(
        store.get_task(task.id).await.unwrap().unwrap().status,
        TaskStatus::InReview
    );
}
