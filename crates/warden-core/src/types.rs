use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::ProcessHandle;

pub type ProjectId = String;
pub type TaskId = String;
pub type AgentId = String;
pub type SessionId = String;
pub type MessageId = String;
pub type DiffId = String;
pub type ApprovalId = String;

/// Provider name (e.g. "claude", "codex").
pub type ProviderId = String;

// ── Project / Task / Agent ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Project-wide auto-commit default; tasks may override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_commit: Option<bool>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_commit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_config_paths: Vec<PathBuf>,
    pub created_at: String,
}

impl Task {
    /// Task override first, then project default, then the global default.
    pub fn effective_auto_commit(&self, project: &Project, global_default: bool) -> bool {
        self.auto_commit
            .or(project.auto_commit)
            .unwrap_or(global_default)
    }
}

/// Agent role profile a task can be assigned to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub role_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// ── Session ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Queued | SessionStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// How a new session continues from a prior one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Continue the same provider conversation.
    Renew,
    /// Fresh conversation seeded with the prior session's prompt.
    Retry,
    /// New parallel conversation branched from prior state.
    Fork,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub task_id: TaskId,
    pub status: SessionStatus,
    pub attempt_number: u32,
    pub provider: ProviderId,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_mode: Option<ResumeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
    /// Provider session id this run resumed or forked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_handle: Option<ProcessHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Context files referenced by the prompt this session was started with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_snapshot: Vec<PathBuf>,
    /// Skill names advertised to this session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_snapshot: Vec<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

// ── Message ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

// ── Diff ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Edit,
    Write,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

/// One unified-diff hunk. Ranges use unified-diff conventions (1-based
/// start; a zero-length range names the line before the insertion point).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    /// Hunk lines prefixed with ' ', '-' or '+', without the `@@` header.
    pub body: String,
}

impl Hunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }

    /// Count of (added, removed) lines in the body.
    pub fn line_counts(&self) -> (usize, usize) {
        let mut added = 0;
        let mut removed = 0;
        for line in self.body.lines() {
            if line.starts_with('+') {
                added += 1;
            } else if line.starts_with('-') {
                removed += 1;
            }
        }
        (added, removed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diff {
    pub id: DiffId,
    pub session_id: SessionId,
    pub task_id: TaskId,
    pub tool_invocation_id: String,
    /// Absolute path of the changed file.
    pub file_path: PathBuf,
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hunks: Vec<Hunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    /// File content before the change; `None` when the file did not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<String>,
    /// Destination of a move recorded as a delete of `file_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<PathBuf>,
    pub status: DiffStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
}

impl Diff {
    /// Drop stored content, keeping metadata. Used once the change is committed.
    pub fn clear_content(&mut self) {
        self.hunks.clear();
        self.full_content = None;
        self.previous_content = None;
    }

    /// Count of (added, removed) lines.
    pub fn line_counts(&self) -> (usize, usize) {
        match self.kind {
            DiffKind::Edit => self.hunks.iter().fold((0, 0), |(a, r), h| {
                let (ha, hr) = h.line_counts();
                (a + ha, r + hr)
            }),
            DiffKind::Write => (
                self.full_content.as_deref().map_or(0, |c| c.lines().count()),
                self.previous_content
                    .as_deref()
                    .map_or(0, |c| c.lines().count()),
            ),
            DiffKind::Delete => (
                0,
                self.previous_content
                    .as_deref()
                    .map_or(0, |c| c.lines().count()),
            ),
        }
    }
}

// ── Approval ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileChangeSummary {
    pub path: String,
    pub kind: Option<DiffKind>,
    pub additions: usize,
    pub deletions: usize,
}

/// Snapshot of what an approval will commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub additions: usize,
    pub deletions: usize,
    #[serde(default)]
    pub files: Vec<FileChangeSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitCommitApproval {
    pub id: ApprovalId,
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub session_id: SessionId,
    pub attempt_number: u32,
    pub status: ApprovalStatus,
    pub commit_message: String,
    /// Paths relative to the project root.
    pub files_changed: Vec<String>,
    pub diff_summary: DiffSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}
