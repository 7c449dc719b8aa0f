//! Prompt assembly for agent spawns.
//!
//! The role's stored soul template comes first, then a `---` separator,
//! then per-role instructions parameterised by the task and repository
//! context. A missing active template is a hard error: spawns fail
//! loudly instead of falling back to anything compiled in.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use trap_db::models::{Comment, CommentType, Project, Role, Signal, Task};
use trap_db::store::{Store, StoreError};

/// Errors from prompt assembly.
#[derive(Debug, Error)]
pub enum PromptError {
    /// No active soul template exists for the role (with or without a
    /// model scope).
    #[error("no active prompt version for role {role}")]
    MissingSoulTemplate { role: Role },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything the builder needs for one spawn.
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub project: &'a Project,
    pub role: Role,
    pub model: &'a str,
    pub worktree_path: String,
    pub branch: String,
    pub comments: &'a [Comment],
    pub signals: &'a [Signal],
    pub pr_number: Option<i64>,
}

/// Assemble the full prompt: active soul template for `(role, model)`,
/// falling back to the model-agnostic `(role, None)` scope, then the
/// per-task instruction block.
pub async fn build_prompt(
    store: &dyn Store,
    ctx: &PromptContext<'_>,
) -> Result<String, PromptError> {
    let soul = match store
        .active_prompt_version(ctx.role, Some(ctx.model))
        .await?
    {
        Some(version) => version,
        None => store
            .active_prompt_version(ctx.role, None)
            .await?
            .ok_or(PromptError::MissingSoulTemplate { role: ctx.role })?,
    };

    let instructions = role_instructions(ctx);
    Ok(format!(
        "{}\n\n---\n\n{}",
        soul.content.trim_end(),
        instructions
    ))
}

/// The per-role instruction block.
fn role_instructions(ctx: &PromptContext<'_>) -> String {
    let task = ctx.task;
    let mut out = String::new();

    out.push_str(&format!("## Task {}\n\n", task.id));
    out.push_str(&format!("**{}**\n\n", task.title));
    if let Some(description) = &task.description {
        out.push_str(description.trim());
        out.push_str("\n\n");
    }

    if let Some(local_path) = &ctx.project.local_path {
        out.push_str(&format!("Repository: {local_path}\n"));
    }
    out.push_str(&format!("Worktree: {}\n", ctx.worktree_path));
    out.push_str(&format!("Branch: {}\n\n", ctx.branch));

    match ctx.role {
        Role::Dev => {
            out.push_str(
                "Implement the task in the worktree above, commit on the task \
                 branch, and open a pull request when the change is complete.\n",
            );
        }
        Role::Reviewer => {
            if let Some(pr) = ctx.pr_number {
                out.push_str(&format!("Review pull request #{pr}.\n"));
            }
            out.push_str(
                "Check out the branch in the worktree, review the diff for \
                 correctness and style, and leave your verdict as review \
                 comments on the pull request.\n",
            );
        }
        Role::Pm => {
            out.push_str(
                "Triage this task: refine the description, set priority, and \
                 split it into actionable subtasks if it is too large.\n",
            );
            let answers = answered_signal_pairs(ctx.signals);
            if !answers.is_empty() {
                out.push_str("\n### Coordinator answers to your earlier questions\n\n");
                for (question, answer) in answers {
                    out.push_str(&format!("- Q: {question}\n  A: {answer}\n"));
                }
            }
            let images = task
                .description
                .as_deref()
                .map(extract_image_urls)
                .unwrap_or_default();
            if !images.is_empty() {
                out.push_str("\n### Attached images\n\n");
                for url in images {
                    out.push_str(&format!("- {url}\n"));
                }
            }
        }
        Role::Research => {
            out.push_str(
                "Research the question in this task and report findings as a \
                 completion comment. Do not modify the repository.\n",
            );
        }
        Role::ConflictResolver => {
            out.push_str(
                "The task branch conflicts with the base branch. Rebase the \
                 worktree, resolve every conflict, and push the updated \
                 branch.\n",
            );
        }
    }

    let discussion: Vec<&Comment> = ctx
        .comments
        .iter()
        .filter(|c| c.kind != CommentType::StatusChange)
        .collect();
    if !discussion.is_empty() {
        out.push_str("\n### Discussion so far\n\n");
        for comment in discussion {
            out.push_str(&format!("- {} ({}): {}\n", comment.author, comment.kind, comment.content));
        }
    }

    out
}

/// `(question, answer)` pairs from answered signals, oldest first.
pub fn answered_signal_pairs(signals: &[Signal]) -> Vec<(String, String)> {
    signals
        .iter()
        .filter_map(|s| {
            s.response
                .as_ref()
                .map(|r| (s.message.clone(), r.clone()))
        })
        .collect()
}

static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\((https?://[^\s)]+|data:[^\s)]+)\)").expect("static regex")
});
static BARE_IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://[^\s<>()]+\.(?:png|jpe?g|gif|webp|bmp)\b").expect("static regex")
});
static DATA_IMAGE_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+").expect("static regex")
});

/// Extract image URLs from a task description, in order of appearance,
/// deduplicated. Three shapes qualify: markdown images whose target is
/// `http(s)` or a data URI, bare URLs with a raster extension, and
/// base64 `data:image/...` URIs.
pub fn extract_image_urls(description: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();

    for capture in MARKDOWN_IMAGE.captures_iter(description) {
        if let Some(url) = capture.get(1) {
            if seen.insert(url.as_str().to_owned()) {
                urls.push(url.as_str().to_owned());
            }
        }
    }
    for m in BARE_IMAGE_URL.find_iter(description) {
        if seen.insert(m.as_str().to_owned()) {
            urls.push(m.as_str().to_owned());
        }
    }
    for m in DATA_IMAGE_URI.find_iter(description) {
        if seen.insert(m.as_str().to_owned()) {
            urls.push(m.as_str().to_owned());
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_markdown_images() {
        let urls = extract_image_urls("See ![screenshot](https://example.com/a.png) here");
        assert_eq!(urls, vec!["https://example.com/a.png"]);
    }

    #[test]
    fn ignores_non_http_markdown_targets() {
        let urls = extract_image_urls("![local](./relative/path.png)");
        assert!(urls.is_empty());
    }

    #[test]
    fn extracts_bare_raster_urls() {
        let urls = extract_image_urls("broken layout: https://cdn.example.com/shots/bug.JPEG end");
        assert_eq!(urls, vec!["https://cdn.example.com/shots/bug.JPEG"]);
    }

    #[test]
    fn extracts_data_uris() {
        let urls = extract_image_urls("inline data:image/png;base64,iVBORw0KGgo= done");
        assert_eq!(urls, vec!["data:image/png;base64,iVBORw0KGgo="]);
    }

    #[test]
    fn dedupes_overlapping_matches() {
        // The markdown target is also a bare raster URL; it must appear once.
        let urls = extract_image_urls("![x](https://example.com/a.png) and https://example.com/a.png");
        assert_eq!(urls, vec!["https://example.com/a.png"]);
    }

    #[test]
    fn answered_pairs_skip_open_questions() {
        use chrono::Utc;
        use trap_db::models::{SignalKind, SignalSeverity};
        use uuid::Uuid;

        let answered = Signal {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            session_key: "workloop:pm:x".into(),
            agent_id: "a".into(),
            kind: SignalKind::Question,
            severity: SignalSeverity::Normal,
            message: "Which database?".into(),
            blocking: true,
            responded_at: Some(Utc::now()),
            response: Some("Postgres".into()),
            delivered_at: None,
            created_at: Utc::now(),
        };
        let mut open = answered.clone();
        open.id = Uuid::new_v4();
        open.responded_at = None;
        open.response = None;

        let pairs = answered_signal_pairs(&[answered, open]);
        assert_eq!(pairs, vec![("Which database?".into(), "Postgres".into())]);
    }
}
