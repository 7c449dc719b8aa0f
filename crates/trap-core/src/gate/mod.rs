//! The coordinator-attention gate.
//!
//! One read-only pass over the store derives whether a project needs a
//! human to look at it, and why. Counts are exact; the per-category
//! projections are capped at [`PROJECTION_CAP`] entries for display.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use trap_db::models::{Comment, Signal, Task};
use trap_db::store::{Store, StoreError};

/// Maximum entries per projected list.
pub const PROJECTION_CAP: usize = 10;

/// Compact task projection for the gate view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: Uuid,
    pub title: String,
    pub priority: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            priority: task.priority.to_string(),
            updated_at: task.updated_at,
        }
    }
}

/// Compact pending-input projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSummary {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for InputSummary {
    fn from(comment: &Comment) -> Self {
        Self {
            id: comment.id,
            task_id: comment.task_id,
            author: comment.author.clone(),
            created_at: comment.created_at,
        }
    }
}

/// Compact signal projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSummary {
    pub id: Uuid,
    pub task_id: Uuid,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Signal> for SignalSummary {
    fn from(signal: &Signal) -> Self {
        Self {
            id: signal.id,
            task_id: signal.task_id,
            kind: signal.kind.to_string(),
            severity: signal.severity.to_string(),
            message: signal.message.clone(),
            created_at: signal.created_at,
        }
    }
}

/// Exact category counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateCounts {
    pub ready_tasks: usize,
    pub pending_inputs: usize,
    pub stuck_tasks: usize,
    pub review_tasks: usize,
    pub pending_dispatch: usize,
    pub unread_escalations: usize,
    pub pending_signals: usize,
}

impl GateCounts {
    pub fn any(&self) -> bool {
        self.ready_tasks > 0
            || self.pending_inputs > 0
            || self.stuck_tasks > 0
            || self.review_tasks > 0
            || self.pending_dispatch > 0
            || self.unread_escalations > 0
            || self.pending_signals > 0
    }
}

/// Capped projections backing the counts.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDetails {
    pub ready_tasks: Vec<TaskSummary>,
    pub pending_inputs: Vec<InputSummary>,
    pub stuck_tasks: Vec<TaskSummary>,
    pub review_tasks: Vec<TaskSummary>,
    pub pending_dispatch: Vec<TaskSummary>,
    pub pending_signals: Vec<SignalSummary>,
}

/// The full gate view for one project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateView {
    pub needs_attention: bool,
    /// Human-readable reasons in priority order, `; `-joined.
    pub reason: Option<String>,
    pub counts: GateCounts,
    pub details: GateDetails,
}

/// Evaluate the gate for one project.
pub async fn evaluate(
    store: &dyn Store,
    project_id: Uuid,
    now: DateTime<Utc>,
    stuck_after: Duration,
) -> Result<GateView, StoreError> {
    let ready = store.ready_unblocked_tasks(project_id).await?;
    let pending_inputs = store.pending_request_inputs(project_id).await?;
    let cutoff = now - chrono::Duration::from_std(stuck_after).unwrap_or(chrono::Duration::hours(2));
    let stuck = store.stuck_tasks(project_id, cutoff).await?;
    let review = store
        .list_tasks(project_id, trap_db::models::TaskStatus::InReview)
        .await?;
    let dispatch = store.unacked_triage_tasks(project_id).await?;
    let unread_escalations = store.unread_escalation_count(project_id).await? as usize;

    let mut signals = store.pending_blocking_signals(project_id).await?;
    // Most severe first, then newest first.
    signals.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then(b.created_at.cmp(&a.created_at))
    });

    let counts = GateCounts {
        ready_tasks: ready.len(),
        pending_inputs: pending_inputs.len(),
        stuck_tasks: stuck.len(),
        review_tasks: review.len(),
        pending_dispatch: dispatch.len(),
        unread_escalations,
        pending_signals: signals.len(),
    };

    let details = GateDetails {
        ready_tasks: project(&ready),
        pending_inputs: pending_inputs
            .iter()
            .take(PROJECTION_CAP)
            .map(InputSummary::from)
            .collect(),
        stuck_tasks: project(&stuck),
        review_tasks: project(&review),
        pending_dispatch: project(&dispatch),
        pending_signals: signals
            .iter()
            .take(PROJECTION_CAP)
            .map(SignalSummary::from)
            .collect(),
    };

    Ok(GateView {
        needs_attention: counts.any(),
        reason: build_reason(&counts),
        counts,
        details,
    })
}

fn project(tasks: &[Task]) -> Vec<TaskSummary> {
    tasks.iter().take(PROJECTION_CAP).map(TaskSummary::from).collect()
}

/// Reasons in fixed priority order: signals, escalations, inputs,
/// dispatch, ready, stuck, review.
fn build_reason(counts: &GateCounts) -> Option<String> {
    let mut reasons = Vec::new();
    push_reason(
        &mut reasons,
        counts.pending_signals,
        "pending signal",
        "pending signals",
    );
    push_reason(
        &mut reasons,
        counts.unread_escalations,
        "unread escalation",
        "unread escalations",
    );
    push_reason(
        &mut reasons,
        counts.pending_inputs,
        "pending input",
        "pending inputs",
    );
    push_reason(
        &mut reasons,
        counts.pending_dispatch,
        "triage awaiting dispatch",
        "triages awaiting dispatch",
    );
    push_reason(&mut reasons, counts.ready_tasks, "ready task", "ready tasks");
    push_reason(&mut reasons, counts.stuck_tasks, "stuck task", "stuck tasks");
    push_reason(
        &mut reasons,
        counts.review_tasks,
        "task in review",
        "tasks in review",
    );

    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}

fn push_reason(reasons: &mut Vec<String>, count: usize, singular: &str, plural: &str) {
    match count {
        0 => {}
        1 => reasons.push(format!("1 {singular}")),
        n => reasons.push(format!("{n} {plural}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_respects_priority_order() {
        let counts = GateCounts {
            ready_tasks: 2,
            pending_inputs: 1,
            stuck_tasks: 0,
            review_tasks: 3,
            pending_dispatch: 0,
            unread_escalations: 1,
            pending_signals: 4,
        };
        let reason = build_reason(&counts).unwrap();
        assert_eq!(
            reason,
            "4 pending signals; 1 unread escalation; 1 pending input; \
             2 ready tasks; 3 tasks in review"
        );
    }

    #[test]
    fn no_counts_means_no_reason() {
        let counts = GateCounts::default();
        assert!(!counts.any());
        assert!(build_reason(&counts).is_none());
    }

    #[test]
    fn any_single_count_needs_attention() {
        let counts = GateCounts {
            stuck_tasks: 1,
            ..GateCounts::default()
        };
        assert!(counts.any());
        assert_eq!(build_reason(&counts).unwrap(), "1 stuck task");
    }
}
