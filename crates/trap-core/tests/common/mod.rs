//! Shared test doubles for the phase and cycle suites.
//!
//! Each integration binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use trap_core::agents::AgentManager;
use trap_core::config::WorkLoopConfig;
use trap_core::cycle::CycleEnv;
use trap_core::github::{GitHubClient, PrInfo};
use trap_core::process::ProcessRunner;
use trap_core::rpc::{
    ChatSendRequest, ChatSendResponse, ChatSendStatus, CronJob, Gateway, RpcError, SessionInfo,
    SessionPreview,
};
use trap_core::worktree::WorktreeSweeper;
use trap_db::store::Store;
use trap_test_utils::memory::MemoryStore;

/// Gateway double: records every send/abort, optionally failing sends.
#[derive(Default)]
pub struct FakeGateway {
    pub sent: Mutex<Vec<ChatSendRequest>>,
    pub aborted: Mutex<Vec<String>>,
    pub crons: Mutex<Vec<CronJob>>,
    pub unavailable: AtomicBool,
    run_counter: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn sent_keys(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.session_key.clone())
            .collect()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn chat_send(&self, request: &ChatSendRequest) -> Result<ChatSendResponse, RpcError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RpcError::Unavailable);
        }
        self.sent.lock().unwrap().push(request.clone());
        let n = self.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChatSendResponse {
            run_id: format!("run-{n}"),
            status: ChatSendStatus::Started,
        })
    }

    async fn chat_abort(&self, session_key: &str) -> Result<(), RpcError> {
        self.aborted.lock().unwrap().push(session_key.to_owned());
        Ok(())
    }

    async fn sessions_list(&self, _limit: Option<u32>) -> Result<Vec<SessionInfo>, RpcError> {
        Ok(Vec::new())
    }

    async fn sessions_preview(
        &self,
        _keys: &[String],
        _limit: u32,
    ) -> Result<Vec<SessionPreview>, RpcError> {
        Ok(Vec::new())
    }

    async fn sessions_reset(&self, _session_key: &str) -> Result<(), RpcError> {
        Ok(())
    }

    async fn sessions_compact(&self, _session_key: &str) -> Result<(), RpcError> {
        Ok(())
    }

    async fn sessions_cancel(&self, _session_key: &str) -> Result<(), RpcError> {
        Ok(())
    }

    async fn config_get(&self) -> Result<serde_json::Value, RpcError> {
        Ok(serde_json::Value::Null)
    }

    async fn cron_add(&self, job: &CronJob) -> Result<(), RpcError> {
        self.crons.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// GitHub double backed by a fixed PR list.
#[derive(Default)]
pub struct FakeGitHub {
    pub prs: Mutex<Vec<PrInfo>>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pr(&self, pr: PrInfo) {
        self.prs.lock().unwrap().push(pr);
    }
}

#[async_trait]
impl GitHubClient for FakeGitHub {
    async fn view_pr(&self, _repo: &str, number: i64) -> Result<Option<PrInfo>> {
        Ok(self
            .prs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.number == number)
            .cloned())
    }

    async fn find_open_pr_by_branch(&self, _repo: &str, branch: &str) -> Result<Option<PrInfo>> {
        Ok(self
            .prs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.is_open() && (p.head_ref == branch || p.head_ref.starts_with(branch)))
            .cloned())
    }

    async fn merged_pr_numbers(&self, _repo: &str, candidates: &[i64]) -> Result<Vec<i64>> {
        let prs = self.prs.lock().unwrap();
        Ok(candidates
            .iter()
            .copied()
            .filter(|n| prs.iter().any(|p| p.number == *n && p.is_merged()))
            .collect())
    }
}

/// A short-cooldown config so tests never wait on real durations.
pub fn test_config() -> WorkLoopConfig {
    WorkLoopConfig {
        reap_cooldown: Duration::from_secs(60),
        ..WorkLoopConfig::default()
    }
}

/// Wire a full cycle environment around the given doubles.
pub fn test_env(
    store: Arc<MemoryStore>,
    gateway: Arc<FakeGateway>,
    github: Arc<FakeGitHub>,
    config: WorkLoopConfig,
) -> CycleEnv {
    let store_dyn: Arc<dyn Store> = store;
    let agents = Arc::new(AgentManager::new(
        gateway,
        Arc::clone(&store_dyn),
        config.reap_cooldown,
    ));
    let runner = Arc::new(ProcessRunner::new());
    let worktrees = Arc::new(WorktreeSweeper::new(
        runner,
        config.subprocess_timeout,
        config.worktree_remove_timeout,
    ));
    CycleEnv {
        store: store_dyn,
        agents,
        github,
        worktrees,
        browser: None,
        config,
    }
}
