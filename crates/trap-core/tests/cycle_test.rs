//! Cycle-driver scenarios: per-project mutual exclusion, phase ordering
//! through a full cycle, and the fatal store-unreachable path.

mod common;

use std::sync::Arc;

use trap_core::cycle::{CycleDriver, CycleEnv, CycleOutcome};
use trap_db::models::{Role, TaskStatus};
use trap_db::store::Store;
use trap_test_utils::{fixtures, memory::MemoryStore};

use common::{FakeGateway, FakeGitHub, test_config, test_env};

fn driver(env: CycleEnv) -> Arc<CycleDriver> {
    Arc::new(CycleDriver::new(env))
}

#[tokio::test]
async fn a_full_cycle_claims_ready_work() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    store
        .create_prompt_version(Role::Dev, None, "You are a dev agent.")
        .await
        .unwrap();

    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();
    let task = store
        .insert_task(fixtures::ready_task(project_id, "one task"))
        .await
        .unwrap();

    let driver = driver(test_env(
        Arc::clone(&store),
        gateway,
        Arc::new(FakeGitHub::new()),
        test_config(),
    ));

    let outcome = driver.run_cycle(project_id).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Ran { cycle: 1 }));

    assert_eq!(
        store.get_task(task.id).await.unwrap().unwrap().status,
        TaskStatus::InProgress
    );

    // Cycle numbers are monotonic per project.
    let outcome = driver.run_cycle(project_id).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Ran { cycle: 2 }));
}

#[tokio::test]
async fn overlapping_cycles_of_one_project_skip() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();

    let driver = driver(test_env(
        Arc::clone(&store),
        Arc::new(FakeGateway::new()),
        Arc::new(FakeGitHub::new()),
        test_config(),
    ));

    // Run many concurrent cycles; the per-project mutex admits them one
    // at a time, and any overlap resolves as SkippedLocked rather than
    // a second concurrent run.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let driver = Arc::clone(&driver);
        handles.push(tokio::spawn(
            async move { driver.run_cycle(project_id).await },
        ));
    }

    let mut ran = 0usize;
    let mut skipped = 0usize;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            CycleOutcome::Ran { .. } => ran += 1,
            CycleOutcome::SkippedLocked => skipped += 1,
        }
    }
    assert_eq!(ran + skipped, 8);
    assert!(ran >= 1);
}

#[tokio::test]
async fn unknown_project_is_a_cycle_error() {
    let store = Arc::new(MemoryStore::new());
    let driver = driver(test_env(
        store,
        Arc::new(FakeGateway::new()),
        Arc::new(FakeGitHub::new()),
        test_config(),
    ));

    let result = driver.run_cycle(uuid::Uuid::new_v4()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unreachable_store_aborts_the_cycle() {
    let store = Arc::new(MemoryStore::new());
    let project = fixtures::project("p1");
    let project_id = project.id;
    store.insert_project(project).await.unwrap();

    let driver = driver(test_env(
        Arc::clone(&store),
        Arc::new(FakeGateway::new()),
        Arc::new(FakeGitHub::new()),
        test_config(),
    ));

    store.set_unavailable(true);
    let result = driver.run_cycle(project_id).await;
    assert!(result.is_err());

    // The next tick works again once the store is back.
    store.set_unavailable(false);
    let outcome = driver.run_cycle(project_id).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Ran { .. }));
}
