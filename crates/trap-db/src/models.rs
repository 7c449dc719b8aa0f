//! Typed entities for every table the supervisor reads or writes.
//!
//! All rows are keyed by an externally generated UUID (distinct from any
//! surrogate id the backend may add) and carry UTC timestamps. Enums are
//! stored as snake_case text and round-trip through `Display`/`FromStr`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an invalid enum string from the store.
#[derive(Debug, Clone, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(type_name = "text", rename_all = "snake_case")]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// The snake_case text form stored in the database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new(stringify!($name), other)),
                }
            }
        }
    };
}

text_enum! {
    /// Kanban status of a task.
    TaskStatus {
        Backlog => "backlog",
        Ready => "ready",
        InProgress => "in_progress",
        InReview => "in_review",
        Blocked => "blocked",
        Done => "done",
    }
}

text_enum! {
    /// Scheduling priority. `rank()` gives the claim order.
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

impl Priority {
    /// Claim order: lower ranks are claimed first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

text_enum! {
    /// Agent role a task is (or will be) handed to.
    Role {
        Pm => "pm",
        Dev => "dev",
        Research => "research",
        Reviewer => "reviewer",
        ConflictResolver => "conflict_resolver",
    }
}

text_enum! {
    /// How a task reached `done`.
    Resolution {
        Completed => "completed",
        Discarded => "discarded",
        Merged => "merged",
    }
}

text_enum! {
    /// Kind of a task comment.
    CommentType {
        Message => "message",
        StatusChange => "status_change",
        RequestInput => "request_input",
        Completion => "completion",
    }
}

text_enum! {
    /// Who authored a comment.
    AuthorType {
        Coordinator => "coordinator",
        Agent => "agent",
        Human => "human",
    }
}

text_enum! {
    /// Kind of an agent signal. Everything except `fyi` blocks.
    SignalKind {
        Question => "question",
        Blocker => "blocker",
        Alert => "alert",
        Fyi => "fyi",
    }
}

impl SignalKind {
    /// Whether signals of this kind block the task until answered.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::Fyi)
    }
}

text_enum! {
    /// Signal severity, most severe first in gate projections.
    SignalSeverity {
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
}

impl SignalSeverity {
    /// Sort order for gate projections: critical first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
        }
    }
}

text_enum! {
    /// Gateway-maintained liveness of an agent session.
    SessionStatus {
        Active => "active",
        Idle => "idle",
        Completed => "completed",
        Stale => "stale",
    }
}

impl SessionStatus {
    /// A terminal session no longer runs; its handle is reaped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stale)
    }
}

text_enum! {
    NotificationType {
        Escalation => "escalation",
        RequestInput => "request_input",
        Completion => "completion",
        System => "system",
    }
}

text_enum! {
    NotificationSeverity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
}

text_enum! {
    /// Chat channel layout a project renders with.
    ChatLayout {
        Slack => "slack",
        Imessage => "imessage",
    }
}

text_enum! {
    /// Append-only audit event kind.
    TaskEventType {
        StatusChanged => "status_changed",
        AgentAssigned => "agent_assigned",
        AgentCompleted => "agent_completed",
        AgentReaped => "agent_reaped",
        PrOpened => "pr_opened",
        PrMerged => "pr_merged",
        CommentAdded => "comment_added",
        TriageSent => "triage_sent",
        TriageEscalated => "triage_escalated",
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// Position spacing within a `(project, status)` lane; leaves room for
/// insert-before reordering without renumbering.
pub const POSITION_STEP: i64 = 1024;

/// A registered project. Deleting a project cascades to its tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub color: String,
    pub repo_url: Option<String>,
    pub local_path: Option<String>,
    pub github_repo: Option<String>,
    pub chat_layout: ChatLayout,
    pub work_loop_enabled: bool,
    pub work_loop_max_agents: Option<i32>,
    pub work_loop_schedule: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of work moving through the kanban state machine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub role: Option<Role>,
    pub assignee: Option<String>,
    pub requires_human_review: bool,
    pub tags: Option<Vec<String>>,
    /// Total order within `(project_id, status)`.
    pub position: i64,
    pub session_id: Option<String>,
    pub agent_session_key: Option<String>,
    pub agent_model: Option<String>,
    pub agent_started_at: Option<DateTime<Utc>>,
    pub agent_last_active_at: Option<DateTime<Utc>>,
    pub agent_retry_count: Option<i32>,
    pub branch: Option<String>,
    pub pr_number: Option<i64>,
    pub escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub triage_sent_at: Option<DateTime<Utc>>,
    pub triage_acked_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// First eight hex characters of the task id; names worktree
    /// directories and fallback branches (`fix/<prefix>`).
    pub fn short_prefix(&self) -> String {
        short_prefix(self.id)
    }
}

/// First eight hex characters of a task id.
pub fn short_prefix(id: Uuid) -> String {
    id.simple().to_string()[..8].to_owned()
}

/// A directed dependency edge: `task_id` depends on `depends_on_id`.
/// The edge set is a DAG; cycle creation is rejected at mutation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A comment on a task. A `request_input` comment is pending until
/// `responded_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author: String,
    pub author_type: AuthorType,
    pub content: String,
    pub kind: CommentType,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An agent-to-coordinator signal. Pending iff blocking and unanswered.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Signal {
    pub id: Uuid,
    pub task_id: Uuid,
    pub session_key: String,
    pub agent_id: String,
    pub kind: SignalKind,
    pub severity: SignalSeverity,
    pub message: String,
    pub blocking: bool,
    pub responded_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Blocking and not yet answered.
    pub fn is_pending(&self) -> bool {
        self.blocking && self.responded_at.is_none()
    }
}

/// Liveness record for one agent conversation, maintained by the agent
/// gateway and mirrored into the store. This row -- not the in-process
/// handle map -- is the ground truth for reaping and ghost detection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRow {
    pub session_key: String,
    pub status: SessionStatus,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub last_active_at: DateTime<Utc>,
}

/// A coordinator-facing notification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub kind: NotificationType,
    pub severity: NotificationSeverity,
    pub title: String,
    pub message: String,
    pub agent: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit log row. Payload schema varies per event type; see
/// the builders in [`crate::store::event_data`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskEvent {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub event_type: TaskEventType,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// A stored soul template for a `(role, model?)` scope. Immutable except
/// for the `active` flag; exactly one version is active per scope.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromptVersion {
    pub id: Uuid,
    pub role: Role,
    pub model: Option<String>,
    pub version: i32,
    pub content: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Backlog,
            TaskStatus::Ready,
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::Blocked,
            TaskStatus::Done,
        ];
        for v in &variants {
            let parsed: TaskStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        let result = "paused".parse::<TaskStatus>();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().value, "paused");
    }

    #[test]
    fn priority_rank_orders_urgent_first() {
        assert!(Priority::Urgent.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn role_display_roundtrip() {
        let variants = [
            Role::Pm,
            Role::Dev,
            Role::Research,
            Role::Reviewer,
            Role::ConflictResolver,
        ];
        for v in &variants {
            let parsed: Role = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
        assert_eq!(Role::ConflictResolver.as_str(), "conflict_resolver");
    }

    #[test]
    fn signal_kind_blocking() {
        assert!(SignalKind::Question.is_blocking());
        assert!(SignalKind::Blocker.is_blocking());
        assert!(SignalKind::Alert.is_blocking());
        assert!(!SignalKind::Fyi.is_blocking());
    }

    #[test]
    fn signal_severity_rank_orders_critical_first() {
        assert!(SignalSeverity::Critical.rank() < SignalSeverity::High.rank());
        assert!(SignalSeverity::High.rank() < SignalSeverity::Normal.rank());
    }

    #[test]
    fn session_status_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Stale.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
    }

    #[test]
    fn event_type_roundtrip() {
        let variants = [
            TaskEventType::StatusChanged,
            TaskEventType::AgentAssigned,
            TaskEventType::AgentCompleted,
            TaskEventType::AgentReaped,
            TaskEventType::PrOpened,
            TaskEventType::PrMerged,
            TaskEventType::CommentAdded,
            TaskEventType::TriageSent,
            TaskEventType::TriageEscalated,
        ];
        for v in &variants {
            let parsed: TaskEventType = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn short_prefix_is_first_eight_hex_chars() {
        let id = Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap();
        assert_eq!(short_prefix(id), "aaaaaaaa");
    }

    #[test]
    fn chat_layout_roundtrip() {
        for v in [ChatLayout::Slack, ChatLayout::Imessage] {
            let parsed: ChatLayout = v.to_string().parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }
}
