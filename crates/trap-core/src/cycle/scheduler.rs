//! Top-level scheduler: one cycle per enabled project per tick.
//!
//! Projects run in parallel; the per-project mutex inside the driver
//! keeps each project at one cycle at a time. Shutdown stops dispatch,
//! drains in-flight cycles up to a deadline, then aborts every tracked
//! agent session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use trap_db::store::StoreError;

use super::{CycleDriver, CycleOutcome};

/// Parse an interval hint out of a cron-like schedule string.
///
/// Only minute-step shapes contribute: `*/N * * * *` means every N
/// minutes and `* * * * *` means every minute. Anything else yields no
/// hint and the default tick applies.
pub fn interval_hint(schedule: &str) -> Option<Duration> {
    let mut fields = schedule.split_whitespace();
    let minute = fields.next()?;
    if fields.count() != 4 {
        return None;
    }
    if minute == "*" {
        return Some(Duration::from_secs(60));
    }
    let step = minute.strip_prefix("*/")?.parse::<u64>().ok()?;
    if step == 0 {
        return None;
    }
    Some(Duration::from_secs(step * 60))
}

/// The work-loop scheduler.
pub struct Scheduler {
    driver: Arc<CycleDriver>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(driver: Arc<CycleDriver>, cancel: CancellationToken) -> Self {
        Self { driver, cancel }
    }

    /// Tick interval: the configured ceiling, lowered by any project
    /// schedule hint that asks for something faster.
    async fn tick_interval(&self) -> Duration {
        let ceiling = self.driver.env().config.tick_interval;
        match self.driver.env().store.list_enabled_projects().await {
            Ok(projects) => projects
                .iter()
                .filter_map(|p| interval_hint(&p.work_loop_schedule))
                .fold(ceiling, Duration::min),
            Err(_) => ceiling,
        }
    }

    /// Run until cancelled.
    pub async fn run(&self) -> Result<()> {
        let tick = self.tick_interval().await;
        tracing::info!(tick_secs = tick.as_secs_f64(), "work loop started");

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Collect cycles that finished since the last tick.
            while in_flight.try_join_next().is_some() {}

            let projects = match self.driver.env().store.list_enabled_projects().await {
                Ok(projects) => projects,
                Err(StoreError::Unavailable(e)) => {
                    tracing::error!(error = %e, "store unreachable, skipping tick");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "project listing failed, skipping tick");
                    continue;
                }
            };

            for project in projects {
                let driver = Arc::clone(&self.driver);
                let slug = project.slug.clone();
                in_flight.spawn(async move {
                    match driver.run_cycle(project.id).await {
                        Ok(CycleOutcome::Ran { .. }) | Ok(CycleOutcome::SkippedLocked) => {}
                        Err(e) => {
                            tracing::error!(project = %slug, error = %e, "cycle failed");
                        }
                    }
                });
            }
        }

        self.shutdown(in_flight).await;
        Ok(())
    }

    /// Drain in-flight cycles up to the grace deadline, then abort every
    /// tracked agent session. Handles are left for a future reap.
    async fn shutdown(&self, mut in_flight: JoinSet<()>) {
        let grace = self.driver.env().config.shutdown_grace;
        tracing::info!(
            in_flight = in_flight.len(),
            grace_secs = grace.as_secs(),
            "shutting down, draining in-flight cycles"
        );

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        remaining = in_flight.len(),
                        "drain deadline expired with cycles still in flight"
                    );
                    in_flight.abort_all();
                    break;
                }
            }
        }

        self.driver.env().agents.kill_all().await;
        tracing::info!("work loop stopped");
    }
}
