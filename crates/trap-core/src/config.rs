//! Runtime configuration for the supervisor core.

use std::env;
use std::time::Duration;

use crate::capacity::CapacityLimits;

/// Connection settings for the agent gateway.
///
/// Resolution: `OPENCLAW_HTTP_URL` overrides the URL assembled from
/// `OPENCLAW_HOST` and `OPENCLAW_PORT`; `OPENCLAW_TOKEN`, when present,
/// is sent as a bearer token.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl GatewayConfig {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: &str = "8089";

    pub fn from_env() -> Self {
        let base_url = env::var("OPENCLAW_HTTP_URL").unwrap_or_else(|_| {
            let host = env::var("OPENCLAW_HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_owned());
            let port = env::var("OPENCLAW_PORT").unwrap_or_else(|_| Self::DEFAULT_PORT.to_owned());
            format!("http://{host}:{port}")
        });
        let token = env::var("OPENCLAW_TOKEN").ok().filter(|t| !t.is_empty());
        Self { base_url, token }
    }

    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
        }
    }
}

/// Tunables of the work loop. Defaults match production behaviour; tests
/// shrink the durations.
#[derive(Debug, Clone)]
pub struct WorkLoopConfig {
    pub limits: CapacityLimits,
    /// Upper bound on the scheduler tick; project schedule hints can only
    /// lower it.
    pub tick_interval: Duration,
    /// Cooldown during which a just-reaped `(task, role)` pair is not
    /// respawned.
    pub reap_cooldown: Duration,
    /// Grace period before an in-progress task with no session row is
    /// declared a ghost.
    pub ghost_grace: Duration,
    /// An in-progress task untouched for this long counts as stuck.
    pub stuck_after: Duration,
    /// Timeout for gateway RPC calls and short subprocesses.
    pub rpc_timeout: Duration,
    pub subprocess_timeout: Duration,
    /// `git worktree remove` gets a longer leash.
    pub worktree_remove_timeout: Duration,
    /// How long shutdown waits for in-flight cycles before aborting
    /// agents.
    pub shutdown_grace: Duration,
    /// Wall-clock budget handed to spawned agents, in seconds.
    pub agent_timeout_seconds: u64,
    /// Base URL of the task HTTP API, forwarded into cron payload
    /// environments for agent-side tools (`TRAP_URL`).
    pub api_url: Option<String>,
    /// URL patterns of agent-opened browser tabs eligible for cleanup.
    pub browser_tab_patterns: Vec<String>,
}

impl Default for WorkLoopConfig {
    fn default() -> Self {
        Self {
            limits: CapacityLimits::default(),
            tick_interval: Duration::from_secs(5),
            reap_cooldown: Duration::from_secs(60),
            ghost_grace: Duration::from_secs(120),
            stuck_after: Duration::from_secs(2 * 60 * 60),
            rpc_timeout: Duration::from_secs(10),
            subprocess_timeout: Duration::from_secs(10),
            worktree_remove_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            agent_timeout_seconds: 1800,
            api_url: env::var("TRAP_URL").ok(),
            browser_tab_patterns: vec!["/pull/".to_owned(), "github.com".to_owned()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_config_explicit() {
        let cfg = GatewayConfig::new("http://gateway:9000", Some("secret".into()));
        assert_eq!(cfg.base_url, "http://gateway:9000");
        assert_eq!(cfg.token.as_deref(), Some("secret"));
    }

    #[test]
    fn workloop_defaults() {
        let cfg = WorkLoopConfig::default();
        assert_eq!(cfg.tick_interval, Duration::from_secs(5));
        assert_eq!(cfg.reap_cooldown, Duration::from_secs(60));
        assert_eq!(cfg.ghost_grace, Duration::from_secs(120));
        assert_eq!(cfg.worktree_remove_timeout, Duration::from_secs(30));
    }
}
