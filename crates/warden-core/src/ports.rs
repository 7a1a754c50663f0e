//! Ports the orchestration core consumes. Implementations live in
//! `warden-store` (repositories) and `warden-conductor` (git).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{StoreError, VcsError};
use crate::types::*;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;
    async fn put_project(&self, project: &Project) -> StoreResult<()>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>>;
    async fn put_task(&self, task: &Task) -> StoreResult<()>;
    async fn list_tasks(&self, project_id: Option<&str>) -> StoreResult<Vec<Task>>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get_agent(&self, id: &str) -> StoreResult<Option<AgentProfile>>;
    async fn put_agent(&self, agent: &AgentProfile) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>>;
    async fn put_session(&self, session: &Session) -> StoreResult<()>;
    /// Sessions of one task, oldest attempt first.
    async fn list_sessions_for_task(&self, task_id: &str) -> StoreResult<Vec<Session>>;
    async fn list_sessions(&self) -> StoreResult<Vec<Session>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append_message(&self, message: &Message) -> StoreResult<()>;
    async fn list_messages(&self, session_id: &str) -> StoreResult<Vec<Message>>;
}

#[async_trait]
pub trait DiffRepository: Send + Sync {
    async fn get_diff(&self, id: &str) -> StoreResult<Option<Diff>>;
    async fn put_diff(&self, diff: &Diff) -> StoreResult<()>;
    async fn list_diffs_for_session(&self, session_id: &str) -> StoreResult<Vec<Diff>>;
    async fn list_diffs_for_task(&self, task_id: &str) -> StoreResult<Vec<Diff>>;
    async fn list_diffs_for_approval(&self, approval_id: &str) -> StoreResult<Vec<Diff>>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn get_approval(&self, id: &str) -> StoreResult<Option<GitCommitApproval>>;
    async fn put_approval(&self, approval: &GitCommitApproval) -> StoreResult<()>;
    async fn find_pending_approval(&self, task_id: &str)
        -> StoreResult<Option<GitCommitApproval>>;
    async fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
    ) -> StoreResult<Vec<GitCommitApproval>>;
}

/// Every repository the core needs, behind one object.
pub trait Store:
    ProjectRepository
    + TaskRepository
    + AgentRepository
    + SessionRepository
    + MessageRepository
    + DiffRepository
    + ApprovalRepository
{
}

impl<T> Store for T where
    T: ProjectRepository
        + TaskRepository
        + AgentRepository
        + SessionRepository
        + MessageRepository
        + DiffRepository
        + ApprovalRepository
{
}

/// One changed path from `status`, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    /// Two-letter porcelain code, e.g. ` M`, `??`.
    pub code: String,
    pub untracked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub files: Vec<String>,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn is_repository(&self, root: &Path) -> bool;
    /// Changed files under `root`, with paths relative to `root` even when it
    /// is a subdirectory of the repository.
    async fn status(&self, root: &Path) -> Result<Vec<FileStatus>, VcsError>;
    /// Unified diff of the working tree against HEAD, limited to `paths` when non-empty.
    async fn diff(&self, root: &Path, paths: &[String]) -> Result<String, VcsError>;
    async fn create_branch(&self, root: &Path, name: &str) -> Result<(), VcsError>;
    async fn delete_branch(&self, root: &Path, name: &str) -> Result<(), VcsError>;
    /// Stage and commit exactly `paths` (relative to `root`).
    async fn commit_paths(
        &self,
        root: &Path,
        paths: &[String],
        message: &str,
    ) -> Result<CommitInfo, VcsError>;
    /// Commit id of HEAD, or `None` before the first commit.
    async fn head(&self, root: &Path) -> Result<Option<String>, VcsError>;
    /// Remove untracked files and directories; returns the removed paths.
    async fn discard_untracked(&self, root: &Path) -> Result<Vec<String>, VcsError>;
}
